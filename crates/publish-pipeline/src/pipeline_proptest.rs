//! Property tests for the publish pipeline.
//!
//! Each case drives a pipeline with scripted acknowledgments and checks that
//! every submission settles exactly once, the in-flight cap holds, and no
//! message is sent more often than the retry policy allows. The threaded
//! cases acknowledge from OS threads in a random order while submissions
//! are still arriving.

use crate::testing::ManualTransport;
use crate::{CorrelationId, DeliveryFailure, PipelineConfig, PublishPipeline, RetryPolicy};
use proptest::prelude::*;
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

/// Verdict for each send, consumed in order; defaults to success when exhausted.
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Deliver,
    Fail,
    DeliverTwice,
}

fn verdict_strategy() -> impl Strategy<Value = Verdict> {
    prop_oneof![
        3 => Just(Verdict::Deliver),
        2 => Just(Verdict::Fail),
        1 => Just(Verdict::DeliverTwice),
    ]
}

struct RunSummary {
    outcomes: HashMap<CorrelationId, (u32, Result<(), DeliveryFailure>)>,
    submitted: Vec<CorrelationId>,
    sends_per_id: HashMap<CorrelationId, u32>,
    peak_in_flight: usize,
}

fn run_pipeline(
    messages: usize,
    in_flight_cap: usize,
    max_attempts: u32,
    verdicts: Vec<Verdict>,
) -> RunSummary {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async move {
        let config = PipelineConfig {
            queue_capacity: messages.max(1),
            in_flight_cap,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
            ..PipelineConfig::default()
        };
        let (transport, mut sent_rx) = ManualTransport::new();
        let (pipeline, mut outcome_rx) = PublishPipeline::start(config, transport).unwrap();

        let mut submitted = Vec::new();
        for i in 0..messages {
            submitted.push(
                pipeline
                    .submit("prop/topic", i.to_le_bytes().to_vec())
                    .await
                    .unwrap(),
            );
        }

        let mut verdicts = verdicts.into_iter();
        let mut outcomes = HashMap::new();
        let mut sends_per_id: HashMap<CorrelationId, u32> = HashMap::new();
        while outcomes.len() < messages {
            tokio::select! {
                Some(sent) = sent_rx.recv() => {
                    *sends_per_id.entry(sent.correlation_id()).or_default() += 1;
                    assert!(pipeline.status().in_flight <= in_flight_cap);
                    match verdicts.next().unwrap_or(Verdict::Deliver) {
                        Verdict::Deliver => sent.deliver(),
                        Verdict::Fail => sent.fail("scripted failure"),
                        Verdict::DeliverTwice => {
                            sent.deliver();
                            sent.deliver();
                        }
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    let previous = outcomes.insert(
                        outcome.correlation_id,
                        (outcome.attempts, outcome.result),
                    );
                    assert!(previous.is_none(), "outcome reported twice");
                }
            }
        }

        // Nothing further may arrive once every message has settled.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(outcome_rx.try_recv().is_err());

        let peak_in_flight = pipeline.status().peak_in_flight;
        let report = pipeline.shutdown().await;
        assert!(report.drained_cleanly);

        RunSummary {
            outcomes,
            submitted,
            sends_per_id,
            peak_in_flight,
        }
    })
}

struct ThreadedSummary {
    outcomes: HashMap<CorrelationId, usize>,
    submitted: Vec<CorrelationId>,
    sends_per_id: HashMap<CorrelationId, u32>,
    peak_in_flight: usize,
}

/// Submit from one task while acks arrive from OS threads after random delays.
fn run_threaded(
    messages: usize,
    in_flight_cap: usize,
    max_attempts: u32,
    acks: Vec<(Verdict, u64)>,
) -> ThreadedSummary {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let config = PipelineConfig {
            queue_capacity: 2,
            in_flight_cap,
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            ..PipelineConfig::default()
        };
        let (transport, mut sent_rx) = ManualTransport::new();
        let (pipeline, mut outcome_rx) = PublishPipeline::start(config, transport).unwrap();

        let submitter = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let mut ids = Vec::with_capacity(messages);
                for i in 0..messages {
                    ids.push(
                        pipeline
                            .submit("prop/threaded", i.to_le_bytes().to_vec())
                            .await
                            .unwrap(),
                    );
                }
                ids
            })
        };

        let mut acks = acks.into_iter();
        let mut ackers = Vec::new();
        let mut outcomes: HashMap<CorrelationId, usize> = HashMap::new();
        let mut sends_per_id: HashMap<CorrelationId, u32> = HashMap::new();
        let settle = async {
            let mut settled = 0;
            while settled < messages {
                tokio::select! {
                    Some(sent) = sent_rx.recv() => {
                        *sends_per_id.entry(sent.correlation_id()).or_default() += 1;
                        assert!(pipeline.status().in_flight <= in_flight_cap);
                        let (verdict, delay_us) = acks.next().unwrap_or((Verdict::Deliver, 0));
                        ackers.push(thread::spawn(move || {
                            thread::sleep(Duration::from_micros(delay_us));
                            match verdict {
                                Verdict::Deliver => sent.deliver(),
                                Verdict::Fail => sent.fail("threaded failure"),
                                Verdict::DeliverTwice => {
                                    sent.deliver();
                                    sent.deliver();
                                }
                            }
                        }));
                    }
                    Some(outcome) = outcome_rx.recv() => {
                        *outcomes.entry(outcome.correlation_id).or_default() += 1;
                        settled += 1;
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), settle)
            .await
            .expect("pipeline did not settle");

        let submitted = submitter.await.unwrap();
        for acker in ackers {
            acker.join().unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        while let Ok(outcome) = outcome_rx.try_recv() {
            *outcomes.entry(outcome.correlation_id).or_default() += 1;
        }

        let peak_in_flight = pipeline.status().peak_in_flight;
        assert!(pipeline.shutdown().await.drained_cleanly);

        ThreadedSummary {
            outcomes,
            submitted,
            sends_per_id,
            peak_in_flight,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_every_submission_settles_once(
        messages in 1usize..12,
        in_flight_cap in 1usize..4,
        max_attempts in 1u32..4,
        verdicts in prop::collection::vec(verdict_strategy(), 0..40),
    ) {
        let summary = run_pipeline(messages, in_flight_cap, max_attempts, verdicts);

        prop_assert_eq!(summary.outcomes.len(), summary.submitted.len());
        for id in &summary.submitted {
            prop_assert!(summary.outcomes.contains_key(id));
        }
        prop_assert!(summary.peak_in_flight <= in_flight_cap);
    }

    #[test]
    fn prop_sends_never_exceed_max_attempts(
        messages in 1usize..8,
        max_attempts in 1u32..5,
        verdicts in prop::collection::vec(verdict_strategy(), 0..40),
    ) {
        let summary = run_pipeline(messages, 2, max_attempts, verdicts);

        for (id, sends) in &summary.sends_per_id {
            prop_assert!(*sends <= max_attempts);
            let (attempts, result) = &summary.outcomes[id];
            prop_assert_eq!(attempts, sends);
            if let Err(failure) = result {
                prop_assert_eq!(
                    failure,
                    &DeliveryFailure::RetriesExhausted {
                        attempts: max_attempts,
                        last_error: "scripted failure".to_string(),
                    }
                );
            }
        }
    }
}

fn threaded_ack_strategy() -> impl Strategy<Value = (Verdict, u64)> {
    (verdict_strategy(), 0u64..500)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_threaded_acks_settle_each_submission_once(
        messages in 1usize..24,
        in_flight_cap in 1usize..5,
        max_attempts in 1u32..4,
        acks in prop::collection::vec(threaded_ack_strategy(), 0..60),
    ) {
        let summary = run_threaded(messages, in_flight_cap, max_attempts, acks);

        prop_assert_eq!(summary.outcomes.len(), summary.submitted.len());
        for id in &summary.submitted {
            prop_assert_eq!(summary.outcomes.get(id), Some(&1));
        }
        prop_assert!(summary.peak_in_flight <= in_flight_cap);
        for sends in summary.sends_per_id.values() {
            prop_assert!(*sends <= max_attempts);
        }
    }
}
