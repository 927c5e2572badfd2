//! Caller-facing ends of the output channel: the sink tool handlers write
//! tips into, and the receiver the caller pulls events from.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use {
    tokio::sync::mpsc,
    tokio_stream::Stream,
};

use crate::{
    conversation::Conversation,
    model::{ChatMessage, OutputEvent},
};

/// Handle for emitting out-of-band events onto the caller-visible output.
///
/// Events sent here are spliced into the output immediately, without waiting
/// for the rest of the tool batch.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<OutputEvent>,
    tip_role: Arc<str>,
}

impl EventSink {
    /// Build a sink over a raw channel. The runner creates one per run; this
    /// is public so tools can be driven outside a run.
    pub fn new(tx: mpsc::Sender<OutputEvent>, tip_role: impl Into<Arc<str>>) -> Self {
        Self {
            tx,
            tip_role: tip_role.into(),
        }
    }

    /// Forward an event. Returns `false` once the caller has dropped the
    /// receiver.
    pub async fn send(&self, event: OutputEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Forward a status message under this run's tip role.
    pub async fn tip(&self, text: impl AsRef<str>) -> bool {
        self.send(OutputEvent::tip(&self.tip_role, text)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Pull-style view over a run's output.
///
/// [`ChatReceiver::recv`] yields events in order and then `None` exactly once
/// the run is over; after that it keeps returning `None`. The receiver also
/// implements [`Stream`].
#[derive(Debug)]
pub struct ChatReceiver {
    rx: mpsc::Receiver<OutputEvent>,
    finished: bool,
    session_id: Option<String>,
    conversation: Arc<Conversation>,
}

impl ChatReceiver {
    pub(crate) fn new(
        rx: mpsc::Receiver<OutputEvent>,
        session_id: Option<String>,
        conversation: Arc<Conversation>,
    ) -> Self {
        Self {
            rx,
            finished: false,
            session_id,
            conversation,
        }
    }

    pub async fn recv(&mut self) -> Option<OutputEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        if event.is_none() {
            self.finished = true;
        }
        event
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Messages accumulated so far, including the tool-call turns the output
    /// itself never shows.
    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.conversation.snapshot().await.messages
    }

    /// Drain the run and concatenate its assistant content, skipping tips.
    pub async fn collect_content(&mut self) -> String {
        let mut text = String::new();
        while let Some(event) = self.recv().await {
            if event.is_assistant() {
                text.push_str(&event.content);
            }
        }
        text
    }
}

impl Stream for ChatReceiver {
    type Item = OutputEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            },
            other => other,
        }
    }
}
