use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The provider refused or failed to open a completion stream.
    #[error("provider stream failed to start: {0:#}")]
    ProviderStart(anyhow::Error),

    /// The model kept requesting tools past the configured turn budget.
    #[error("tool loop exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { max_turns: usize },

    /// A handler failed while the `abort` handler-error policy was active.
    #[error("tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error came from the caller's cancellation token rather
    /// than from a failure worth reporting on the output stream.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
