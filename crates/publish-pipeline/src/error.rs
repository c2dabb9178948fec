//! Pipeline error types.

use crate::CorrelationId;
use thiserror::Error;

/// Errors returned to callers of the publish pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The bounded queue is saturated and the caller asked not to wait.
    #[error("Publish queue is full")]
    QueueFull,

    /// Shutdown has begun; new submissions are refused while draining.
    #[error("Pipeline is shutting down")]
    ShuttingDown,

    /// The pipeline has stopped and will never accept work again.
    #[error("Pipeline is closed")]
    PipelineClosed,

    /// Invalid pipeline configuration
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias using PublishError.
pub type PublishResult<T> = Result<T, PublishError>;

/// Errors raised by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session could not be established or was lost. Fatal; not retried here.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport refused a message outright. Handled like a failed delivery.
    #[error("Send rejected: {0}")]
    SendRejected(String),
}

/// Errors from the outstanding-delivery table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// No in-flight entry exists for this id (never inserted or already resolved).
    #[error("Unknown correlation id: {0}")]
    UnknownCorrelationId(CorrelationId),

    /// An entry with this id is already in flight.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// The table already holds `capacity` entries.
    #[error("In-flight capacity of {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    /// A failure for an earlier attempt than the one now in flight.
    #[error("Stale failure for {id}: attempt {attempt}, in flight {current}")]
    StaleAttempt {
        id: CorrelationId,
        attempt: u32,
        current: u32,
    },
}

/// Terminal per-message failure reported on the outcome channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Every allowed attempt failed.
    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The message was not confirmed before shutdown completed.
    #[error("Abandoned on shutdown")]
    AbandonedOnShutdown,
}
