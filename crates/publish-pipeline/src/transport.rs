//! Transport contract the pipeline hands messages to.

use crate::{AckSink, CorrelationId, OutboundMessage, TransportError};

/// Asynchronous, acknowledgment-reporting message transport.
///
/// `send` only queues the message for delivery and must not wait on the
/// network. For every send it accepts, the transport calls
/// [`AckSink::on_ack`] exactly once (from any thread, at any later time)
/// with the message's correlation id. Duplicate acknowledgments are
/// tolerated and ignored.
///
/// Returning `Err(TransportError::SendRejected)` means the message was not
/// accepted; the pipeline treats it like a failed delivery and applies its
/// retry policy. The sink must not be called for a rejected send.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: OutboundMessage, sink: AckSink) -> Result<(), TransportError>;

    /// The pipeline stopped waiting for `attempt` of `correlation_id`
    /// (acknowledgment timeout or shutdown). Transports that track pending
    /// sends should release that one; its sink may still be called.
    fn forget(&self, correlation_id: CorrelationId, attempt: u32) {
        let _ = (correlation_id, attempt);
    }
}
