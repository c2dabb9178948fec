//! Acknowledgment entry point handed to transports.

use crate::pipeline::{DeliveryOutcome, Shared};
use crate::CorrelationId;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Broker verdict for a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgment {
    /// The broker confirmed delivery.
    Delivered,
    /// The broker reported a failure; the detail feeds retry logging.
    Failed(String),
}

impl Acknowledgment {
    /// Build from a success flag and optional error detail.
    pub fn from_parts(success: bool, error: Option<String>) -> Self {
        if success {
            Self::Delivered
        } else {
            Self::Failed(error.unwrap_or_else(|| "unspecified failure".to_string()))
        }
    }
}

/// Callback a transport uses to report acknowledgments.
///
/// One sink is issued per send and remembers the attempt it was issued for.
/// Safe to call from any thread. Holds only a weak reference, so a sink kept
/// by a transport does not keep a dropped pipeline alive; acknowledgments
/// arriving after that are discarded.
#[derive(Clone)]
pub struct AckSink {
    shared: Weak<Shared>,
    attempt: u32,
}

impl fmt::Debug for AckSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckSink")
            .field("attempt", &self.attempt)
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl AckSink {
    pub(crate) fn new(shared: Weak<Shared>, attempt: u32) -> Self {
        Self { shared, attempt }
    }

    /// Attempt number of the send this sink belongs to.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report the verdict for `correlation_id`.
    ///
    /// Acknowledgments for ids no longer in flight (duplicates, or late ones
    /// after a timeout already settled the entry) are ignored. A late
    /// success for an earlier attempt still settles the message; a late
    /// failure for an earlier attempt does not count against the current one.
    pub fn on_ack(&self, correlation_id: CorrelationId, ack: Acknowledgment) {
        let Some(shared) = self.shared.upgrade() else {
            debug!(correlation_id = %correlation_id, "Pipeline gone, dropping acknowledgment");
            return;
        };
        shared.apply_ack(correlation_id, self.attempt, ack);
    }
}

impl Shared {
    pub(crate) fn apply_ack(
        self: &Arc<Self>,
        correlation_id: CorrelationId,
        attempt: u32,
        ack: Acknowledgment,
    ) {
        {
            let mut state = self.state.lock();
            match ack {
                Acknowledgment::Delivered => match state.table.resolve_success(correlation_id) {
                    Ok(envelope) => {
                        debug!(
                            correlation_id = %correlation_id,
                            attempt = envelope.attempt(),
                            "Delivery confirmed"
                        );
                        self.report(&mut state, DeliveryOutcome::delivered(&envelope));
                    }
                    Err(err) => {
                        debug!(error = %err, "Ignoring acknowledgment");
                        return;
                    }
                },
                Acknowledgment::Failed(detail) => {
                    match state.table.resolve_failure(correlation_id, attempt) {
                        Ok(envelope) => {
                            warn!(
                                correlation_id = %correlation_id,
                                attempt = envelope.attempt(),
                                error = %detail,
                                "Delivery failed"
                            );
                            self.route_failure(&mut state, envelope, detail);
                        }
                        Err(err) => {
                            debug!(error = %err, "Ignoring failure acknowledgment");
                            return;
                        }
                    }
                }
            }
        }

        self.dispatch.notify_one();
        self.settled.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledgment_from_parts() {
        assert_eq!(Acknowledgment::from_parts(true, None), Acknowledgment::Delivered);
        assert_eq!(
            Acknowledgment::from_parts(true, Some("ignored".to_string())),
            Acknowledgment::Delivered
        );
        assert_eq!(
            Acknowledgment::from_parts(false, Some("no route".to_string())),
            Acknowledgment::Failed("no route".to_string())
        );
        assert_eq!(
            Acknowledgment::from_parts(false, None),
            Acknowledgment::Failed("unspecified failure".to_string())
        );
    }

    #[test]
    fn detached_sink_ignores_acks() {
        let sink = AckSink::new(Weak::new(), 1);
        sink.on_ack(CorrelationId::new(), Acknowledgment::Delivered);
        assert_eq!(sink.attempt(), 1);
        assert!(format!("{sink:?}").contains("live: false"));
    }
}
