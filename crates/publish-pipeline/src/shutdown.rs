//! Lifecycle phases and the graceful drain.

use crate::pipeline::{DeliveryOutcome, Shared};
use crate::{CorrelationId, DeliveryFailure, Envelope};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

/// Pipeline lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Accepting submissions.
    Running,
    /// Refusing submissions, finishing in-flight work.
    Draining,
    /// Nothing accepted, nothing dispatched.
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }

    pub fn accepts_submissions(self) -> bool {
        self == Phase::Running
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary returned by [`PublishPipeline::shutdown`](crate::PublishPipeline::shutdown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every accepted message settled before the drain timeout.
    pub drained_cleanly: bool,
    /// Messages reported `AbandonedOnShutdown` when the pipeline stopped.
    pub abandoned: usize,
    /// Time from the shutdown request to `Stopped`.
    pub elapsed: Duration,
}

/// Broadcasts phase changes to the dispatcher and any observers.
pub(crate) struct ShutdownCoordinator {
    phase_tx: watch::Sender<Phase>,
}

impl ShutdownCoordinator {
    pub(crate) fn new() -> Self {
        let (phase_tx, _) = watch::channel(Phase::Running);
        Self { phase_tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Must be called with the state lock held so observers never see a
    /// phase the state has not reached.
    pub(crate) fn publish(&self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }
}

impl Shared {
    /// Begin draining (first caller only) and wait for `Stopped`.
    ///
    /// The drain runs as its own task, so a caller that stops waiting does
    /// not leave the pipeline stuck in `Draining`.
    pub(crate) async fn shutdown(self: &Arc<Self>) -> ShutdownReport {
        let phase_rx = self.coordinator.subscribe();
        if let Some(started) = self.begin_drain() {
            let shared = Arc::clone(self);
            self.runtime.spawn(async move {
                shared.drain(started).await;
            });
        }
        self.wait_for_stop(phase_rx).await
    }

    /// Move `Running` to `Draining`. Returns the start time if this call did it.
    fn begin_drain(&self) -> Option<Instant> {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Running {
                return None;
            }
            state.phase = Phase::Draining;
            self.coordinator.publish(Phase::Draining);
            info!(
                queued = state.queue.len(),
                in_flight = state.table.len(),
                retrying = state.retrying.len(),
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "Draining publish pipeline"
            );
        }

        // Release submitters blocked on a full queue.
        self.space.notify_waiters();
        self.dispatch.notify_one();
        Some(Instant::now())
    }

    /// Wait until idle or the drain deadline, then stop.
    async fn drain(&self, started: Instant) -> ShutdownReport {
        let deadline = started + self.config.drain_timeout;
        let drained = loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            if self.state.lock().is_idle() {
                break true;
            }

            tokio::select! {
                _ = &mut settled => {}
                _ = sleep_until(deadline) => break false,
            }
        };

        self.stop(started, drained)
    }

    /// Abandon whatever is left and enter `Stopped`.
    fn stop(&self, started: Instant, drained: bool) -> ShutdownReport {
        let mut state = self.state.lock();

        let mut leftovers: Vec<Envelope> = state.table.drain();
        let forgotten: Vec<(CorrelationId, u32)> = leftovers
            .iter()
            .map(|envelope| (envelope.correlation_id(), envelope.attempt()))
            .collect();
        leftovers.extend(state.retrying.drain().map(|(_, envelope)| envelope));
        leftovers.extend(state.queue.drain(..));

        let abandoned = leftovers.len();
        for envelope in leftovers {
            warn!(
                correlation_id = %envelope.correlation_id(),
                attempt = envelope.attempt(),
                "Abandoning unconfirmed message"
            );
            self.report(
                &mut state,
                DeliveryOutcome::failed(&envelope, DeliveryFailure::AbandonedOnShutdown),
            );
        }

        let report = ShutdownReport {
            drained_cleanly: drained && abandoned == 0,
            abandoned,
            elapsed: started.elapsed(),
        };
        state.phase = Phase::Stopped;
        state.final_report = Some(report.clone());
        self.coordinator.publish(Phase::Stopped);
        drop(state);

        self.forget_sends(&forgotten);
        self.space.notify_waiters();
        self.dispatch.notify_one();

        info!(
            drained_cleanly = report.drained_cleanly,
            abandoned = report.abandoned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Publish pipeline stopped"
        );
        report
    }

    async fn wait_for_stop(&self, mut phase_rx: watch::Receiver<Phase>) -> ShutdownReport {
        let _ = phase_rx.wait_for(|phase| *phase == Phase::Stopped).await;
        self.state
            .lock()
            .final_report
            .clone()
            .unwrap_or(ShutdownReport {
                drained_cleanly: false,
                abandoned: 0,
                elapsed: Duration::ZERO,
            })
    }
}
