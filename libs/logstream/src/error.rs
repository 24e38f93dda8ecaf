//! Log stream error types.

use thiserror::Error;

/// Result type alias for log stream operations.
pub type Result<T> = std::result::Result<T, LogStreamError>;

#[derive(Error, Debug)]
pub enum LogStreamError {
    /// The backing ring buffer cannot hold the entry right now. Recoverable;
    /// the pipeline retries the write phase alone.
    #[error("log buffer full: {requested} bytes")]
    Backpressure { requested: usize },

    /// The entry is larger than the log buffer accepts.
    #[error("entry of {requested} bytes exceeds maximum fragment length {max}")]
    EntryTooLarge { requested: usize, max: usize },

    /// Malformed entry bytes or value serialization failure.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl LogStreamError {
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// True for the non-fatal try-again-later outcome.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

impl From<dispatch::DispatchError> for LogStreamError {
    fn from(err: dispatch::DispatchError) -> Self {
        match err {
            dispatch::DispatchError::Backpressure { requested, .. } => {
                Self::Backpressure { requested }
            }
            dispatch::DispatchError::FragmentTooLarge { requested, max } => {
                Self::EntryTooLarge { requested, max }
            }
            dispatch::DispatchError::Configuration { message } => Self::Configuration { message },
        }
    }
}

impl From<bincode::Error> for LogStreamError {
    fn from(err: bincode::Error) -> Self {
        Self::codec(err.to_string())
    }
}
