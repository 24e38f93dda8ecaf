//! Transport error types.

use thiserror::Error;

use crate::address::RemoteAddress;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Connect/read/write failure at the media level. Retried with backoff by
    /// the conductor; listeners hear nothing until a connect succeeds.
    #[error("connection error: {message} (remote: {address})")]
    Connection {
        message: String,
        address: RemoteAddress,
        source: Option<std::io::Error>,
    },

    /// The shared send buffer cannot hold the message right now.
    #[error("send buffer full: {requested} bytes")]
    SendBufferFull { requested: usize },

    /// The message exceeds the configured per-channel maximum.
    #[error("message of {requested} bytes exceeds maximum message size {max}")]
    MessageTooLarge { requested: usize, max: usize },

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The scheduler backing this transport has shut down.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] runtime::RuntimeError),
}

impl TransportError {
    pub fn connection(message: impl Into<String>, address: RemoteAddress) -> Self {
        Self::Connection {
            message: message.into(),
            address,
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        address: RemoteAddress,
        source: std::io::Error,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            address,
            source: Some(source),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True when the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::SendBufferFull { .. }
        )
    }
}

impl From<dispatch::DispatchError> for TransportError {
    fn from(err: dispatch::DispatchError) -> Self {
        match err {
            dispatch::DispatchError::Backpressure { requested, .. } => {
                Self::SendBufferFull { requested }
            }
            dispatch::DispatchError::FragmentTooLarge { requested, max } => {
                Self::MessageTooLarge { requested, max }
            }
            dispatch::DispatchError::Configuration { message } => Self::Configuration { message },
        }
    }
}
