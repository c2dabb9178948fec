//! Broker session error types.

use publish_pipeline::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Broker session error type.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was not valid base64
    #[error("Payload decode error: {0}")]
    Payload(#[from] base64::DecodeError),

    /// The broker refused the session
    #[error("Session refused: {0}")]
    Refused(String),

    /// The broker did not answer in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using BrokerError.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl From<BrokerError> for TransportError {
    fn from(err: BrokerError) -> Self {
        TransportError::Connection(err.to_string())
    }
}
