//! # Publish Pipeline: Reliable Topic Publishing
//!
//! Accepts messages for topics, hands them to a [`Transport`] under a bounded
//! in-flight limit, tracks each one until the broker acknowledges it, retries
//! failures with exponential backoff, and drains gracefully on shutdown.
//!
//! ## Architecture
//!
//! ```text
//! submit() ──▶ ┌──────────────┐     ┌────────────┐     ┌─────────────┐
//!              │ Bounded Queue │────▶│ Dispatcher │────▶│  Transport  │
//!              │  (VecDeque)   │     │   (task)   │     │  (broker)   │
//!              └──────▲───────┘     └─────┬──────┘     └──────┬──────┘
//!                     │                   │                   │ on_ack
//!              ┌──────┴───────┐     ┌─────▼────────────┐     │
//!              │ Retry timers │◀────│ Outstanding Table │◀────┘
//!              │  (backoff)   │     │  (in-flight cap)  │
//!              └──────────────┘     └─────────┬────────┘
//!                                             │
//!                                   DeliveryOutcome channel
//! ```
//!
//! ## Key Features
//!
//! - **Backpressure**: [`PublishPipeline::submit`] waits while the queue is
//!   full; [`PublishPipeline::try_submit`] fails fast with `QueueFull`.
//!
//! - **In-flight cap**: at most `in_flight_cap` messages await acknowledgment.
//!
//! - **Retries**: failed, rejected or timed-out attempts re-enter the front of
//!   the queue after `base_delay * 2^(n-1)` (capped), up to `max_attempts`.
//!
//! - **Exactly one outcome**: every accepted submission yields one
//!   [`DeliveryOutcome`]; duplicate acknowledgments are ignored.
//!
//! - **Graceful shutdown**: `Running → Draining → Stopped`, with anything
//!   unconfirmed at the drain deadline reported `AbandonedOnShutdown`.
//!
//! ## Example
//!
//! ```ignore
//! use publish_pipeline::{PipelineConfig, PublishPipeline};
//!
//! let (pipeline, mut outcomes) = PublishPipeline::start(PipelineConfig::default(), transport)?;
//! let id = pipeline.submit("tutorial/topic", payload).await?;
//!
//! while let Some(outcome) = outcomes.recv().await {
//!     println!("{} -> {:?}", outcome.correlation_id, outcome.result);
//! }
//!
//! let report = pipeline.shutdown().await;
//! ```

mod ack;
mod envelope;
mod error;
mod outstanding;
mod pipeline;
mod retry;
mod shutdown;
mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod pipeline_proptest;

pub use ack::{AckSink, Acknowledgment};
pub use envelope::{CorrelationId, Envelope, OutboundMessage};
pub use error::{DeliveryFailure, PublishError, PublishResult, TableError, TransportError};
pub use outstanding::{OutstandingEntry, OutstandingTable, RejectedEntry};
pub use pipeline::{
    DeliveryOutcome, OutcomeReceiver, PipelineConfig, PipelineStatus, PublishPipeline,
};
pub use retry::{RetryDecision, RetryPolicy};
pub use shutdown::{Phase, ShutdownReport};
pub use transport::Transport;
