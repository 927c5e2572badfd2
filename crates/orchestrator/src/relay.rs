//! Per-turn stream relay.
//!
//! Consumes one provider stream on its own task and republishes it on a
//! bounded queue: text deltas pass straight through, tool-call fragments are
//! merged into complete calls and published once, as a single batch, after
//! the provider stream ends.

use std::sync::Arc;

use {
    futures::StreamExt,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace, warn},
};

use crate::{
    ids::IdGenerator,
    model::{ChunkStream, OutputEvent, Role, ToolCall, ToolCallDelta},
};

/// Item published by the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Content to forward to the caller as-is.
    Content(OutputEvent),
    /// Every tool call requested during the turn, in start order. Always the
    /// last item of a turn when present.
    ToolBatch(Vec<ToolCall>),
}

/// Argument buffers for the calls started so far in one turn.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
}

impl ToolCallAccumulator {
    /// Merge one fragment.
    ///
    /// A fragment with a provider id starts a new call under a freshly
    /// generated id. A fragment without one appends its argument text to the
    /// most recently started call, or starts a call if none exists yet.
    pub fn push(&mut self, delta: ToolCallDelta, ids: &dyn IdGenerator) {
        if delta.id.is_empty()
            && let Some(last) = self.calls.last_mut()
        {
            last.arguments.push_str(&delta.arguments);
            return;
        }
        let id = ids.next_id();
        debug!(
            tool = %delta.name,
            provider_id = %delta.id,
            id = %id,
            stream_index = ?delta.index,
            position = self.calls.len(),
            "tool call started in stream"
        );
        self.calls.push(ToolCall {
            id,
            name: delta.name,
            arguments: delta.arguments,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
    }
}

/// Spawn a relay task for `stream` and return the receiving end of its queue.
///
/// The queue holds at most `capacity` items, so a slow consumer applies
/// backpressure to the network read instead of buffering without bound.
/// Cancelling `cancel` stops the read; nothing further is published.
pub fn spawn_relay(
    stream: ChunkStream,
    ids: Arc<dyn IdGenerator>,
    capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<RelayEvent> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(relay(stream, tx, ids, cancel));
    rx
}

async fn relay(
    mut stream: ChunkStream,
    tx: mpsc::Sender<RelayEvent>,
    ids: Arc<dyn IdGenerator>,
    cancel: CancellationToken,
) {
    let mut acc = ToolCallAccumulator::default();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("relay cancelled mid-stream");
                return;
            },
            next = stream.next() => next,
        };

        match next {
            None => break,
            Some(Ok(chunk)) => {
                if !chunk.tool_calls.is_empty() {
                    for delta in chunk.tool_calls {
                        acc.push(delta, ids.as_ref());
                    }
                    continue;
                }
                if chunk.content.is_empty() {
                    continue;
                }
                // Once the model has switched to calling tools, stray text in
                // the same turn is not part of the answer.
                if !acc.is_empty() {
                    trace!(len = chunk.content.len(), "dropping text after tool calls");
                    continue;
                }
                let event = OutputEvent {
                    role: chunk.role.unwrap_or(Role::Assistant),
                    content: chunk.content,
                };
                if tx.send(RelayEvent::Content(event)).await.is_err() {
                    debug!("relay consumer gone, stopping");
                    return;
                }
            },
            Some(Err(e)) => {
                if acc.is_empty() {
                    warn!(error = %e, "provider stream failed mid-turn");
                    let _ = tx
                        .send(RelayEvent::Content(OutputEvent::assistant(e.to_string())))
                        .await;
                    return;
                }
                warn!(
                    error = %e,
                    tool_calls = acc.len(),
                    "provider stream failed after tool calls started; dispatching what arrived"
                );
                break;
            },
        }
    }

    if !acc.is_empty() {
        let calls = acc.finish();
        debug!(tool_calls = calls.len(), "publishing tool batch");
        let _ = tx.send(RelayEvent::ToolBatch(calls)).await;
    }
}
