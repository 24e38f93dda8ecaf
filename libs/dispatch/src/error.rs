//! Dispatcher error types.
//!
//! Backpressure is the only error a producer is expected to see in steady
//! state. It is a retry signal, never a fault: nothing was written and no
//! position advanced.

use thiserror::Error;

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The ring buffer cannot hold the requested fragment until consumers
    /// make progress. Recoverable; the caller decides whether to retry or
    /// reject the work.
    #[error("backpressure: no space for {requested} bytes in ring buffer '{name}'")]
    Backpressure { name: String, requested: usize },

    /// The requested fragment can never fit, regardless of consumer progress.
    #[error("fragment of {requested} bytes exceeds maximum fragment length {max}")]
    FragmentTooLarge { requested: usize, max: usize },

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl DispatchError {
    pub fn backpressure(name: impl Into<String>, requested: usize) -> Self {
        Self::Backpressure {
            name: name.into(),
            requested,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True for the non-fatal try-again-later outcome.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_is_classified_as_retryable() {
        assert!(DispatchError::backpressure("send-buffer", 64).is_backpressure());
        assert!(!DispatchError::FragmentTooLarge {
            requested: 10,
            max: 5
        }
        .is_backpressure());
    }
}
