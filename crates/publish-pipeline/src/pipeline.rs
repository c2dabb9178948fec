//! Publish pipeline: bounded queue, in-flight cap, dispatch worker and retries.

use crate::outstanding::{OutstandingEntry, OutstandingTable};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::shutdown::{Phase, ShutdownCoordinator, ShutdownReport};
use crate::{
    AckSink, Acknowledgment, CorrelationId, DeliveryFailure, Envelope, PublishError,
    PublishResult, Transport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for queueing, concurrency, retry and shutdown behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum envelopes waiting for an in-flight slot.
    pub queue_capacity: usize,
    /// Maximum envelopes handed to the transport and not yet acknowledged.
    pub in_flight_cap: usize,
    /// Attempt cap and backoff.
    pub retry: RetryPolicy,
    /// How long an in-flight envelope may wait for its acknowledgment.
    pub ack_timeout: Duration,
    /// How often the in-flight table is swept for expired entries.
    pub sweep_interval: Duration,
    /// How long shutdown waits for in-flight work before abandoning it.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            in_flight_cap: 16,
            retry: RetryPolicy::default(),
            ack_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_millis(250),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> PublishResult<()> {
        if self.queue_capacity == 0 {
            return Err(PublishError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.in_flight_cap == 0 {
            return Err(PublishError::InvalidConfig(
                "in_flight_cap must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PublishError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(PublishError::InvalidConfig(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Final word on one accepted submission. Exactly one is emitted per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub correlation_id: CorrelationId,
    pub topic: Arc<str>,
    /// Attempt number the envelope had reached when it settled.
    pub attempts: u32,
    pub result: Result<(), DeliveryFailure>,
}

impl DeliveryOutcome {
    pub(crate) fn delivered(envelope: &Envelope) -> Self {
        Self {
            correlation_id: envelope.correlation_id(),
            topic: envelope.topic().into(),
            attempts: envelope.attempt(),
            result: Ok(()),
        }
    }

    pub(crate) fn failed(envelope: &Envelope, failure: DeliveryFailure) -> Self {
        Self {
            correlation_id: envelope.correlation_id(),
            topic: envelope.topic().into(),
            attempts: envelope.attempt(),
            result: Err(failure),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Receiving half of the per-message outcome channel.
pub type OutcomeReceiver = mpsc::UnboundedReceiver<DeliveryOutcome>;

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub phase: Phase,
    /// Envelopes waiting for an in-flight slot.
    pub queued: usize,
    /// Envelopes awaiting acknowledgment.
    pub in_flight: usize,
    /// Envelopes waiting out a backoff delay.
    pub retrying: usize,
    /// Highest in-flight count observed since start.
    pub peak_in_flight: usize,
    pub delivered: u64,
    pub failed: u64,
}

pub(crate) struct PipelineState {
    pub(crate) phase: Phase,
    pub(crate) queue: VecDeque<Envelope>,
    pub(crate) table: OutstandingTable,
    pub(crate) retrying: HashMap<CorrelationId, Envelope>,
    pub(crate) peak_in_flight: usize,
    pub(crate) delivered: u64,
    pub(crate) failed: u64,
    pub(crate) final_report: Option<ShutdownReport>,
}

impl PipelineState {
    fn new(in_flight_cap: usize, queue_capacity: usize) -> Self {
        Self {
            phase: Phase::Running,
            queue: VecDeque::with_capacity(queue_capacity),
            table: OutstandingTable::new(in_flight_cap),
            retrying: HashMap::new(),
            peak_in_flight: 0,
            delivered: 0,
            failed: 0,
            final_report: None,
        }
    }

    /// No envelope is queued, in flight, or waiting to retry.
    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.table.is_empty() && self.retrying.is_empty()
    }
}

enum Enqueue {
    Accepted(CorrelationId),
    Full(Envelope),
}

/// State shared by submitters, the dispatcher, ack sinks and retry timers.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) state: Mutex<PipelineState>,
    /// Wakes the dispatcher: new work, a freed slot, or a retry due.
    pub(crate) dispatch: Notify,
    /// Wakes blocked submitters: queue space freed or phase changed.
    pub(crate) space: Notify,
    /// Wakes shutdown: an envelope left the pipeline.
    pub(crate) settled: Notify,
    pub(crate) outcomes: mpsc::UnboundedSender<DeliveryOutcome>,
    pub(crate) coordinator: ShutdownCoordinator,
    pub(crate) runtime: Handle,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Shared {
    fn enqueue(&self, envelope: Envelope) -> PublishResult<Enqueue> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Running => {}
            Phase::Draining => return Err(PublishError::ShuttingDown),
            Phase::Stopped => return Err(PublishError::PipelineClosed),
        }
        if state.queue.len() >= self.config.queue_capacity {
            return Ok(Enqueue::Full(envelope));
        }

        let id = envelope.correlation_id();
        debug!(
            correlation_id = %id,
            topic = %envelope.topic(),
            queued = state.queue.len() + 1,
            "Enqueued message"
        );
        state.queue.push_back(envelope);
        drop(state);

        self.dispatch.notify_one();
        Ok(Enqueue::Accepted(id))
    }

    /// Move queued envelopes into flight until the cap or the queue runs out.
    fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let message = {
                let mut state = self.state.lock();
                if state.phase == Phase::Stopped || state.table.is_full() {
                    return;
                }
                let Some(envelope) = state.queue.pop_front() else {
                    return;
                };

                let now = Instant::now();
                let message = envelope.to_outbound();
                let entry = OutstandingEntry::new(envelope, now, now + self.config.ack_timeout);
                if let Err(rejected) = state.table.insert(entry) {
                    error!(
                        correlation_id = %message.correlation_id,
                        error = %rejected.error,
                        "In-flight table refused envelope"
                    );
                    state
                        .queue
                        .push_front(rejected.entry.into_envelope());
                    return;
                }
                state.peak_in_flight = state.peak_in_flight.max(state.table.len());
                message
            };
            self.space.notify_waiters();

            let id = message.correlation_id;
            let attempt = message.attempt;
            debug!(correlation_id = %id, attempt, "Handing message to transport");

            let sink = AckSink::new(Arc::downgrade(self), attempt);
            if let Err(err) = self.transport.send(message, sink) {
                warn!(correlation_id = %id, attempt, error = %err, "Transport rejected message");
                self.apply_ack(id, attempt, Acknowledgment::Failed(err.to_string()));
            }
        }
    }

    /// Route expired in-flight entries through the retry policy.
    fn sweep_expired(self: &Arc<Self>) {
        let mut state = self.state.lock();
        let expired = state.table.sweep_expired(Instant::now());
        if expired.is_empty() {
            return;
        }
        let forgotten: Vec<(CorrelationId, u32)> = expired
            .iter()
            .map(|envelope| (envelope.correlation_id(), envelope.attempt()))
            .collect();
        for envelope in expired {
            warn!(
                correlation_id = %envelope.correlation_id(),
                attempt = envelope.attempt(),
                timeout_ms = self.config.ack_timeout.as_millis() as u64,
                "Acknowledgment timed out"
            );
            self.route_failure(&mut state, envelope, "acknowledgment timed out".to_string());
        }
        drop(state);

        self.forget_sends(&forgotten);
        self.settled.notify_waiters();
    }

    /// Apply the retry policy to an envelope whose attempt just failed.
    ///
    /// Retries stop once shutdown begins; the envelope is abandoned instead.
    pub(crate) fn route_failure(
        self: &Arc<Self>,
        state: &mut PipelineState,
        mut envelope: Envelope,
        error: String,
    ) {
        if state.phase != Phase::Running {
            debug!(
                correlation_id = %envelope.correlation_id(),
                error = %error,
                "Not retrying during shutdown"
            );
            self.report(
                state,
                DeliveryOutcome::failed(&envelope, DeliveryFailure::AbandonedOnShutdown),
            );
            return;
        }

        match self.config.retry.decide(envelope.attempt()) {
            RetryDecision::RetryAfter(delay) => {
                let id = envelope.correlation_id();
                info!(
                    correlation_id = %id,
                    attempt = envelope.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Delivery failed, retrying"
                );
                envelope.bump_attempt();
                state.retrying.insert(id, envelope);
                self.schedule_retry(id, delay);
            }
            RetryDecision::GiveUp => {
                error!(
                    correlation_id = %envelope.correlation_id(),
                    attempts = envelope.attempt(),
                    error = %error,
                    "Max attempts exceeded"
                );
                let failure = DeliveryFailure::RetriesExhausted {
                    attempts: envelope.attempt(),
                    last_error: error,
                };
                self.report(state, DeliveryOutcome::failed(&envelope, failure));
            }
        }
    }

    /// Emit an outcome and update counters.
    pub(crate) fn report(&self, state: &mut PipelineState, outcome: DeliveryOutcome) {
        if outcome.is_delivered() {
            state.delivered += 1;
        } else {
            state.failed += 1;
        }
        if let Err(err) = self.outcomes.send(outcome) {
            debug!(
                correlation_id = %err.0.correlation_id,
                "Outcome receiver dropped"
            );
        }
    }

    /// Tell the transport to stop tracking sends the pipeline gave up on.
    /// Called without the state lock held.
    pub(crate) fn forget_sends(&self, sends: &[(CorrelationId, u32)]) {
        for (id, attempt) in sends {
            self.transport.forget(*id, *attempt);
        }
    }

    fn schedule_retry(self: &Arc<Self>, id: CorrelationId, delay: Duration) {
        let shared = Arc::downgrade(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.requeue_retry(id);
            }
        });
    }

    /// Return a retried envelope to the front of the queue.
    ///
    /// Bypasses the capacity bound: the envelope was already accepted once.
    fn requeue_retry(&self, id: CorrelationId) {
        let mut state = self.state.lock();
        let Some(envelope) = state.retrying.remove(&id) else {
            // Abandoned by shutdown while the timer was pending.
            return;
        };
        debug!(correlation_id = %id, attempt = envelope.attempt(), "Requeued for retry");
        state.queue.push_front(envelope);
        drop(state);

        self.dispatch.notify_one();
    }

    fn status(&self) -> PipelineStatus {
        let state = self.state.lock();
        PipelineStatus {
            phase: state.phase,
            queued: state.queue.len(),
            in_flight: state.table.len(),
            retrying: state.retrying.len(),
            peak_in_flight: state.peak_in_flight,
            delivered: state.delivered,
            failed: state.failed,
        }
    }
}

async fn run_dispatcher(shared: Arc<Shared>, mut phase_rx: watch::Receiver<Phase>) {
    let mut sweep = interval(shared.config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        shared.dispatch_ready();

        tokio::select! {
            _ = shared.dispatch.notified() => {}
            _ = sweep.tick() => {
                shared.sweep_expired();
            }
            changed = phase_rx.changed() => {
                if changed.is_err() || *phase_rx.borrow() == Phase::Stopped {
                    break;
                }
            }
        }
    }

    debug!("Dispatcher stopped");
}

struct DispatcherGuard(JoinHandle<()>);

impl Drop for DispatcherGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to a running publish pipeline.
///
/// Cheap to clone; all clones drive the same pipeline. Dropping the last
/// clone stops the dispatcher without draining, so call
/// [`shutdown`](Self::shutdown) first to get an outcome for every message.
#[derive(Clone)]
pub struct PublishPipeline {
    shared: Arc<Shared>,
    _dispatcher: Arc<DispatcherGuard>,
}

impl PublishPipeline {
    /// Validate `config` and spawn the dispatcher on the current runtime.
    ///
    /// Returns the pipeline handle and the receiver on which one
    /// [`DeliveryOutcome`] arrives per accepted submission.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<T: Transport>(
        config: PipelineConfig,
        transport: Arc<T>,
    ) -> PublishResult<(Self, OutcomeReceiver)> {
        config.validate()?;

        let (outcomes, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState::new(
                config.in_flight_cap,
                config.queue_capacity,
            )),
            config,
            dispatch: Notify::new(),
            space: Notify::new(),
            settled: Notify::new(),
            outcomes,
            coordinator: ShutdownCoordinator::new(),
            runtime: Handle::current(),
            transport,
        });

        let phase_rx = shared.coordinator.subscribe();
        let task = tokio::spawn(run_dispatcher(shared.clone(), phase_rx));

        info!(
            queue_capacity = shared.config.queue_capacity,
            in_flight_cap = shared.config.in_flight_cap,
            max_attempts = shared.config.retry.max_attempts,
            "Publish pipeline started"
        );

        Ok((
            Self {
                shared,
                _dispatcher: Arc::new(DispatcherGuard(task)),
            },
            receiver,
        ))
    }

    /// Submit a message, waiting for queue space if necessary.
    ///
    /// Fails with `ShuttingDown` once draining has begun (including while
    /// waiting for space) and with `PipelineClosed` once stopped.
    pub async fn submit(
        &self,
        topic: impl Into<Arc<str>>,
        payload: impl Into<Arc<[u8]>>,
    ) -> PublishResult<CorrelationId> {
        let mut envelope = Envelope::new(topic, payload);
        loop {
            let space = self.shared.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.shared.enqueue(envelope)? {
                Enqueue::Accepted(id) => return Ok(id),
                Enqueue::Full(returned) => {
                    debug!(
                        correlation_id = %returned.correlation_id(),
                        "Queue full, waiting for space"
                    );
                    envelope = returned;
                }
            }

            space.await;
        }
    }

    /// Submit a message without waiting; fails with `QueueFull` when saturated.
    pub fn try_submit(
        &self,
        topic: impl Into<Arc<str>>,
        payload: impl Into<Arc<[u8]>>,
    ) -> PublishResult<CorrelationId> {
        match self.shared.enqueue(Envelope::new(topic, payload))? {
            Enqueue::Accepted(id) => Ok(id),
            Enqueue::Full(_) => Err(PublishError::QueueFull),
        }
    }

    /// Stop accepting work, drain within the drain timeout, then stop.
    ///
    /// Safe to call more than once; later callers wait for the same result.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shared.shutdown().await
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared.status()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.shared.coordinator.subscribe()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }
}
