//! Bus error types.

use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The transport rejected the envelope.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The bus has been shut down.
    #[error("Event bus is closed")]
    Closed,

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by an event handler.
///
/// Any handler failure is treated as retryable by the transport; after the
/// retry budget is exhausted the envelope is dead-lettered.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("payload deserialization failed: {e}"))
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
