//! The tool loop: stream a turn, dispatch its tool batch, continue with the
//! updated conversation until a turn ends without tool calls.

use std::sync::Arc;

use {
    funcall_config::{HandlerErrorPolicy, OrchestratorConfig},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    conversation::Conversation,
    dispatch::ToolDispatcher,
    error::{Error, Result},
    ids::{IdGenerator, RandomIds},
    model::{ChatProvider, ChatRequest, ChunkStream, DEFAULT_TIP_ROLE, OutputEvent, ToolCall},
    output::{ChatReceiver, EventSink},
    relay::{RelayEvent, spawn_relay},
    tool_registry::ToolRegistry,
};

/// Provider calls allowed per run when none (or 0) is configured.
pub const DEFAULT_MAX_TURNS: usize = 25;

const DEFAULT_BUFFER: usize = 100;

fn resolve_max_turns(configured: usize) -> usize {
    if configured == 0 {
        warn!(
            default = DEFAULT_MAX_TURNS,
            "orchestrator.max_turns was 0; falling back to default"
        );
        return DEFAULT_MAX_TURNS;
    }
    configured
}

/// Per-run settings. Nothing here is shared between runs.
#[derive(Clone)]
pub struct RunOptions {
    /// Role tag carried by tip events emitted through the [`EventSink`].
    pub tip_role: String,
    pub max_turns: usize,
    pub relay_buffer: usize,
    pub output_buffer: usize,
    pub handler_errors: HandlerErrorPolicy,
    /// Opaque caller tag, handed to tool handlers and back on the receiver.
    pub session_id: Option<String>,
    pub cancel: CancellationToken,
    /// Source of the identifiers assigned to merged tool calls.
    pub ids: Arc<dyn IdGenerator>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tip_role: DEFAULT_TIP_ROLE.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            relay_buffer: DEFAULT_BUFFER,
            output_buffer: DEFAULT_BUFFER,
            handler_errors: HandlerErrorPolicy::default(),
            session_id: None,
            cancel: CancellationToken::new(),
            ids: Arc::new(RandomIds),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            tip_role: config.tip_role.clone(),
            max_turns: config.max_turns,
            relay_buffer: config.relay_buffer,
            output_buffer: config.output_buffer,
            handler_errors: config.handler_errors,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    #[must_use]
    pub fn with_handler_errors(mut self, policy: HandlerErrorPolicy) -> Self {
        self.handler_errors = policy;
        self
    }

    #[must_use]
    pub fn with_tip_role(mut self, tip_role: impl Into<String>) -> Self {
        self.tip_role = tip_role.into();
        self
    }
}

/// Start a tool-calling run.
///
/// The first provider call is made before this returns: if it cannot start,
/// the error comes back here and no receiver exists. Everything after that
/// (tool dispatch, continuation calls, mid-stream failures) is reported on
/// the receiver, which ends once the model answers without calling tools.
///
/// Any tool definitions already on `request` are replaced by the registry's.
pub async fn run_tool_loop(
    provider: Arc<dyn ChatProvider>,
    mut request: ChatRequest,
    tools: ToolRegistry,
    options: RunOptions,
) -> Result<ChatReceiver> {
    if !request.tools.is_empty() {
        warn!(
            count = request.tools.len(),
            "request already carries tool definitions; replacing them with the registry"
        );
    }
    request.tools = tools.list_schemas();
    let max_turns = resolve_max_turns(options.max_turns);

    info!(
        provider = %provider.name(),
        model = %provider.id(),
        tools = ?tools.tool_names(),
        max_turns,
        session = options.session_id.as_deref().unwrap_or(""),
        "starting tool loop"
    );

    let conversation = Arc::new(Conversation::new(request));
    let first = provider
        .stream(conversation.snapshot().await, &options.cancel)
        .await
        .map_err(|e| start_error(e, &options.cancel))?;

    let (tx, rx) = mpsc::channel(options.output_buffer.max(1));
    let sink = EventSink::new(tx, options.tip_role.as_str());
    let dispatcher = ToolDispatcher::new(
        Arc::new(tools),
        Arc::clone(&conversation),
        sink.clone(),
        options.handler_errors,
        options.session_id.clone(),
        options.cancel.clone(),
    );

    let driver = ToolLoop {
        provider,
        conversation: Arc::clone(&conversation),
        dispatcher,
        sink,
        ids: options.ids,
        relay_buffer: options.relay_buffer,
        max_turns,
        cancel: options.cancel,
    };
    tokio::spawn(driver.run(first));

    Ok(ChatReceiver::new(rx, options.session_id, conversation))
}

/// A start failure caused by the run's own cancellation is a cancellation.
fn start_error(err: anyhow::Error, cancel: &CancellationToken) -> Error {
    if cancel.is_cancelled() {
        Error::Cancelled
    } else {
        Error::ProviderStart(err)
    }
}

enum TurnOutcome {
    /// The turn ended without tool calls.
    Finished,
    /// The turn requested tools.
    ToolBatch(Vec<ToolCall>),
    /// The caller went away or cancelled the run.
    Stopped,
}

struct ToolLoop {
    provider: Arc<dyn ChatProvider>,
    conversation: Arc<Conversation>,
    dispatcher: ToolDispatcher,
    sink: EventSink,
    ids: Arc<dyn IdGenerator>,
    relay_buffer: usize,
    max_turns: usize,
    cancel: CancellationToken,
}

impl ToolLoop {
    async fn run(self, first: ChunkStream) {
        let mut stream = first;
        let mut turn = 1;

        loop {
            debug!(turn, "streaming turn");
            let calls = match self.stream_turn(stream).await {
                TurnOutcome::Finished => {
                    info!(turn, "tool loop finished");
                    return;
                },
                TurnOutcome::Stopped => {
                    debug!(turn, "tool loop stopped by caller");
                    return;
                },
                TurnOutcome::ToolBatch(calls) => calls,
            };

            match self.continue_after(turn, calls).await {
                Ok(next) => {
                    stream = next;
                    turn += 1;
                },
                Err(e) if e.is_cancelled() => {
                    debug!(turn, "tool loop cancelled between turns");
                    return;
                },
                Err(e) => {
                    warn!(turn, error = %e, "tool loop failed");
                    let _ = self.sink.send(OutputEvent::assistant(e.to_string())).await;
                    return;
                },
            }
        }
    }

    /// Forward one turn's content and return how it ended.
    async fn stream_turn(&self, stream: ChunkStream) -> TurnOutcome {
        let mut relay = spawn_relay(
            stream,
            Arc::clone(&self.ids),
            self.relay_buffer,
            self.cancel.clone(),
        );

        while let Some(event) = relay.recv().await {
            match event {
                RelayEvent::Content(event) => {
                    if !self.sink.send(event).await {
                        // Dropping `relay` stops the reader task.
                        return TurnOutcome::Stopped;
                    }
                },
                RelayEvent::ToolBatch(calls) => return TurnOutcome::ToolBatch(calls),
            }
        }

        if self.cancel.is_cancelled() {
            TurnOutcome::Stopped
        } else {
            TurnOutcome::Finished
        }
    }

    /// Run the batch, then open the next turn's stream.
    async fn continue_after(&self, turn: usize, calls: Vec<ToolCall>) -> Result<ChunkStream> {
        if turn >= self.max_turns {
            return Err(Error::MaxTurnsExceeded {
                max_turns: self.max_turns,
            });
        }

        self.ensure_listening()?;
        self.dispatcher.dispatch(calls).await?;
        self.ensure_listening()?;

        let request = self.conversation.snapshot().await;
        info!(
            turn = turn + 1,
            messages = request.messages.len(),
            "continuing after tool results"
        );
        self.provider
            .stream(request, &self.cancel)
            .await
            .map_err(|e| start_error(e, &self.cancel))
    }

    /// Treat a dropped receiver like a cancelled run: nobody would see the
    /// next turn.
    fn ensure_listening(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.sink.is_closed() {
            debug!("receiver dropped, abandoning run");
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
