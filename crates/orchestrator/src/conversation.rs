//! Shared conversation state for one orchestrated run.

use {tokio::sync::Mutex, tracing::trace};

use crate::model::{ChatMessage, ChatRequest};

/// Append-only conversation shared by the tool loop and concurrently running
/// tool handlers.
///
/// The only operations are [`Conversation::append`] and
/// [`Conversation::snapshot`]. Both take the same lock, held just for the
/// push or the copy, so a snapshot never observes a half-applied append and
/// handler I/O is never serialized behind it.
#[derive(Debug)]
pub struct Conversation {
    request: Mutex<ChatRequest>,
}

impl Conversation {
    pub fn new(request: ChatRequest) -> Self {
        Self {
            request: Mutex::new(request),
        }
    }

    pub async fn append(&self, message: ChatMessage) {
        let mut request = self.request.lock().await;
        trace!(role = %message.role(), position = request.messages.len(), "appending message");
        request.messages.push(message);
    }

    /// Copy of the full request (metadata plus every message appended so far).
    pub async fn snapshot(&self) -> ChatRequest {
        self.request.lock().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.request.lock().await.messages.len()
    }
}
