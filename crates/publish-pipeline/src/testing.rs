//! In-memory transport for exercising the pipeline without a broker.
//!
//! Every accepted send is forwarded to a channel so the test decides when,
//! and how, each message is acknowledged.

use crate::{AckSink, Acknowledgment, CorrelationId, OutboundMessage, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message the pipeline handed to [`ManualTransport`].
#[derive(Debug)]
pub struct SentMessage {
    pub message: OutboundMessage,
    sink: AckSink,
}

impl SentMessage {
    pub fn correlation_id(&self) -> CorrelationId {
        self.message.correlation_id
    }

    pub fn attempt(&self) -> u32 {
        self.message.attempt
    }

    /// Acknowledge as delivered.
    pub fn deliver(&self) {
        self.sink
            .on_ack(self.message.correlation_id, Acknowledgment::Delivered);
    }

    /// Acknowledge as failed.
    pub fn fail(&self, detail: impl Into<String>) {
        self.sink.on_ack(
            self.message.correlation_id,
            Acknowledgment::Failed(detail.into()),
        );
    }
}

/// Transport whose acknowledgments are driven by the caller.
pub struct ManualTransport {
    sent_tx: mpsc::UnboundedSender<SentMessage>,
    rejections: Mutex<VecDeque<String>>,
    forgotten: Mutex<Vec<(CorrelationId, u32)>>,
    accepted: AtomicUsize,
}

impl ManualTransport {
    /// Create the transport and the receiver of its accepted sends.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SentMessage>) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            sent_tx,
            rejections: Mutex::new(VecDeque::new()),
            forgotten: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
        });
        (transport, sent_rx)
    }

    /// Refuse the next send with `SendRejected(reason)`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.rejections.lock().push_back(reason.into());
    }

    /// Number of sends accepted so far.
    pub fn send_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// `(correlation_id, attempt)` pairs the pipeline stopped waiting for.
    pub fn forgotten(&self) -> Vec<(CorrelationId, u32)> {
        self.forgotten.lock().clone()
    }
}

impl Transport for ManualTransport {
    fn send(&self, message: OutboundMessage, sink: AckSink) -> Result<(), TransportError> {
        if let Some(reason) = self.rejections.lock().pop_front() {
            return Err(TransportError::SendRejected(reason));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.sent_tx
            .send(SentMessage { message, sink })
            .map_err(|_| TransportError::SendRejected("receiver dropped".to_string()))
    }

    fn forget(&self, correlation_id: CorrelationId, attempt: u32) {
        self.forgotten.lock().push((correlation_id, attempt));
    }
}
