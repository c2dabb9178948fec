//! Publisher run loop.

use broker_transport::{BrokerSession, SessionConfig};
use publish_pipeline::{
    DeliveryOutcome, OutcomeReceiver, PipelineConfig, PublishPipeline, PublishResult,
    ShutdownReport,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything one run needs, resolved from arguments and configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    pub topic: String,
    pub interval: Duration,
    pub message_size_kb: usize,
    /// Stop after this many submissions; `None` runs until the stop signal.
    pub count: Option<u64>,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub shutdown: ShutdownReport,
}

/// `size_kb * 1024` bytes of `'a'`.
pub fn create_payload(size_kb: usize) -> Arc<[u8]> {
    vec![b'a'; size_kb * 1024].into()
}

/// Connect, publish until `count` is reached or `stop` resolves, then drain.
pub async fn run<S>(settings: RunSettings, stop: S) -> Result<RunSummary, Box<dyn std::error::Error>>
where
    S: Future<Output = ()>,
{
    let session = Arc::new(BrokerSession::connect(&settings.session).await?);
    let (pipeline, outcomes) = PublishPipeline::start(settings.pipeline.clone(), session.clone())?;
    let reporter = tokio::spawn(report_outcomes(outcomes));

    let topic: Arc<str> = settings.topic.as_str().into();
    let payload = create_payload(settings.message_size_kb);
    info!(
        topic = %topic,
        size_bytes = payload.len(),
        interval_ms = settings.interval.as_millis() as u64,
        "Connected, publishing"
    );

    let mut submitted = 0;
    tokio::select! {
        result = publish_loop(&pipeline, &topic, &payload, settings.interval, settings.count, &mut submitted) => {
            if let Err(e) = result {
                error!(error = %e, "Publishing stopped");
            }
        }
        _ = stop => {
            info!("Received shutdown signal, draining");
        }
    }

    let shutdown = pipeline.shutdown().await;
    session.close();
    drop(pipeline);
    let (delivered, failed) = reporter.await?;

    info!(
        submitted,
        delivered,
        failed,
        drained_cleanly = shutdown.drained_cleanly,
        abandoned = shutdown.abandoned,
        "Publisher finished"
    );
    Ok(RunSummary {
        submitted,
        delivered,
        failed,
        shutdown,
    })
}

async fn publish_loop(
    pipeline: &PublishPipeline,
    topic: &Arc<str>,
    payload: &Arc<[u8]>,
    interval: Duration,
    count: Option<u64>,
    submitted: &mut u64,
) -> PublishResult<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while count.map_or(true, |limit| *submitted < limit) {
        ticker.tick().await;
        let id = pipeline.submit(topic.clone(), payload.clone()).await?;
        debug!(correlation_id = %id, "Sending message");
        *submitted += 1;
    }
    Ok(())
}

/// Log each outcome; returns (delivered, failed) once the channel closes.
async fn report_outcomes(mut outcomes: OutcomeReceiver) -> (u64, u64) {
    let mut delivered = 0;
    let mut failed = 0;
    while let Some(outcome) = outcomes.recv().await {
        log_outcome(&outcome);
        if outcome.is_delivered() {
            delivered += 1;
        } else {
            failed += 1;
        }
    }
    (delivered, failed)
}

fn log_outcome(outcome: &DeliveryOutcome) {
    match &outcome.result {
        Ok(()) => info!(
            correlation_id = %outcome.correlation_id,
            attempts = outcome.attempts,
            "Producer received response for message"
        ),
        Err(failure) => warn!(
            correlation_id = %outcome.correlation_id,
            attempts = outcome.attempts,
            error = %failure,
            "Producer received error for message"
        ),
    }
}
