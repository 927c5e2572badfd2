//! Tool-call identifier generation.
//!
//! The relay assigns its own identifiers to accumulated calls instead of
//! trusting the provider's, so calls that interleave inside one batch can
//! never be correlated with the wrong tool result.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Keep generated IDs OpenAI-compatible (`maxLength: 40`).
const TOOL_CALL_ID_MAX_LEN: usize = 40;

/// Source of fresh tool-call identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random `call_<uuid>` identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        let mut id = format!("call_{}", uuid::Uuid::new_v4().simple());
        id.truncate(TOOL_CALL_ID_MAX_LEN);
        id
    }
}

/// Deterministic `<prefix>_1`, `<prefix>_2`, ... identifiers.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicUsize,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicUsize::new(1),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new("call")
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}_{n}", self.prefix)
    }
}
