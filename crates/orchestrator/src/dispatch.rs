//! Tool batch execution.
//!
//! A batch is recorded in the conversation as one assistant message carrying
//! every call, then each call runs and appends exactly one tool message with
//! its result text.

use std::sync::Arc;

use {
    funcall_config::HandlerErrorPolicy,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    args::Args,
    conversation::Conversation,
    error::{Error, Result},
    model::{ChatMessage, ToolCall},
    output::EventSink,
    tool_registry::{ToolContext, ToolRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Concurrent,
    Sequential,
}

/// Pick how a batch runs: sequential as soon as one call names a registered
/// tool that is not concurrency-safe. Unknown names impose no constraint.
pub fn execution_mode(calls: &[ToolCall], registry: &ToolRegistry) -> ExecutionMode {
    let any_unsafe = calls
        .iter()
        .any(|call| registry.is_concurrency_safe(&call.name) == Some(false));
    if any_unsafe {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Concurrent
    }
}

/// Runs tool batches for one orchestration run.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    conversation: Arc<Conversation>,
    sink: EventSink,
    policy: HandlerErrorPolicy,
    session_id: Option<String>,
    cancel: CancellationToken,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        conversation: Arc<Conversation>,
        sink: EventSink,
        policy: HandlerErrorPolicy,
        session_id: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            conversation,
            sink,
            policy,
            session_id,
            cancel,
        }
    }

    /// Execute `calls` and append their results to the conversation.
    ///
    /// Handler failures become result text under [`HandlerErrorPolicy::Report`].
    /// Under [`HandlerErrorPolicy::Abort`] the first failure is returned and
    /// still-running siblings are cancelled.
    pub async fn dispatch(&self, calls: Vec<ToolCall>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.conversation
            .append(ChatMessage::assistant_with_tools(None, calls.clone()))
            .await;

        let mode = execution_mode(&calls, &self.registry);
        info!(
            tool_calls = calls.len(),
            mode = ?mode,
            session = self.session_id.as_deref().unwrap_or(""),
            "dispatching tool batch"
        );

        match mode {
            ExecutionMode::Sequential => {
                for call in &calls {
                    self.run_call(call, &self.cancel).await?;
                }
                Ok(())
            },
            ExecutionMode::Concurrent => {
                let batch_cancel = self.cancel.child_token();
                let futures = calls.iter().map(|call| self.run_call(call, &batch_cancel));
                let result = futures::future::try_join_all(futures).await;
                if result.is_err() {
                    batch_cancel.cancel();
                }
                result.map(|_| ())
            },
        }
    }

    async fn run_call(&self, call: &ToolCall, cancel: &CancellationToken) -> Result<()> {
        let outcome = match self.registry.get(&call.name) {
            None => {
                warn!(tool = %call.name, id = %call.id, "model called an unknown tool");
                Err(format!("unknown tool: {}", call.name))
            },
            Some(tool) => {
                info!(tool = %call.name, id = %call.id, args = %call.arguments, "executing tool");
                let ctx = ToolContext {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    session_id: self.session_id.clone(),
                    cancel: cancel.clone(),
                };
                let args = Args::new(call.arguments.as_str());
                let invocation = tool.call(ctx, args, self.sink.clone());
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(tool = %call.name, id = %call.id, "tool call cancelled");
                        return Err(Error::Cancelled);
                    },
                    result = invocation => result.map_err(|e| format!("{e:#}")),
                }
            },
        };

        let content = match outcome {
            Ok(text) => {
                info!(tool = %call.name, id = %call.id, "tool execution succeeded");
                text
            },
            Err(message) => {
                warn!(tool = %call.name, id = %call.id, error = %message, "tool execution failed");
                if self.policy == HandlerErrorPolicy::Abort {
                    return Err(Error::ToolFailed {
                        tool: call.name.clone(),
                        message,
                    });
                }
                message
            },
        };

        self.conversation
            .append(ChatMessage::tool(call.id.clone(), content))
            .await;
        Ok(())
    }
}
