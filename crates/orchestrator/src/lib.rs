//! Streaming tool-calling orchestration.
//!
//! A run streams a model turn to the caller, merges the tool-call fragments of
//! that turn into complete calls, executes them (concurrently when every tool
//! allows it), appends the results to the conversation and continues with the
//! next turn. The caller only ever sees assistant content and tool tips.

pub mod args;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod model;
pub mod output;
pub mod relay;
pub mod runner;
pub mod tool_registry;

pub use {
    args::Args,
    conversation::Conversation,
    dispatch::{ExecutionMode, ToolDispatcher, execution_mode},
    error::{Error, Result},
    ids::{IdGenerator, RandomIds, SequentialIds},
    model::{
        ChatChunk, ChatMessage, ChatProvider, ChatRequest, ChunkStream, DEFAULT_TIP_ROLE,
        OutputEvent, Role, ToolCall, ToolCallDelta,
    },
    output::{ChatReceiver, EventSink},
    runner::{DEFAULT_MAX_TURNS, RunOptions, run_tool_loop},
    tool_registry::{FnTool, Tool, ToolContext, ToolRegistry},
};

pub use funcall_config::HandlerErrorPolicy;
