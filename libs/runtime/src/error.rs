//! Scheduler error types.

use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A scheduler-bound API was used off its owning thread. This is a
    /// programming error and is surfaced immediately rather than retried.
    #[error("invalid context: {message}")]
    InvalidContext { message: String },

    /// The scheduler has shut down and can no longer accept work.
    #[error("scheduler '{name}' is terminated")]
    Terminated { name: String },

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl RuntimeError {
    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::InvalidContext {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
