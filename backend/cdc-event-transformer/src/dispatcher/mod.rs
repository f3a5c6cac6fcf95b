//! Batched publication of normalized events.
//!
//! The dispatcher turns an ordered sequence of [`NormalizedEvent`]s into bus
//! entries, packs them into batches that respect the bus limits, issues one
//! batch-publish call per batch and folds the per-entry outcomes into a
//! [`DispatchReport`]. It never retries; what to do with failed entries is the
//! caller's decision.

pub mod batching;
pub mod sns;

pub use batching::{BatchLimits, Chunk};
pub use sns::SnsBatchPublisher;

use crate::metrics::TransformerMetrics;
use async_trait::async_trait;
use event_schema::{attributes, NormalizedEvent};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Batch-level failure of a publish call
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to build publish request: {0}")]
    Build(String),
}

/// One message handed to the bus
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEntry {
    pub event_id: String,
    pub event_type: String,
    /// Envelope JSON
    pub body: String,
    /// String message attributes, in insertion order
    pub attributes: Vec<(String, String)>,
}

impl PublishEntry {
    pub fn from_event(event: &NormalizedEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: event.id().to_string(),
            event_type: event.event_type().to_string(),
            body: event.to_message_body()?,
            attributes: vec![
                (
                    attributes::EVENT_TYPE.to_string(),
                    event.event_type().to_string(),
                ),
                (attributes::EVENT_SOURCE.to_string(), event.source().to_string()),
            ],
        })
    }

    /// Size as counted against the per-call payload limit: the body plus every
    /// attribute's name, data type and value.
    pub fn size_bytes(&self) -> usize {
        self.body.len()
            + self
                .attributes
                .iter()
                .map(|(name, value)| name.len() + STRING_DATA_TYPE.len() + value.len())
                .sum::<usize>()
    }
}

/// Data type of every message attribute
pub const STRING_DATA_TYPE: &str = "String";

/// Outcome of a single entry inside a publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Accepted {
        message_id: Option<String>,
    },
    Rejected {
        code: String,
        message: Option<String>,
        sender_fault: bool,
    },
}

/// Message bus capable of batch publication.
///
/// `publish_batch` returns, for every entry it has a result for, the entry's
/// zero-based position in `entries` and its outcome. Entries without a result
/// are treated as rejected by the caller.
#[async_trait]
pub trait BatchPublisher: Send + Sync {
    async fn publish_batch(
        &self,
        topic: &str,
        entries: &[PublishEntry],
    ) -> Result<Vec<(usize, EntryOutcome)>, PublishError>;
}

/// Why an event was not published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The bus answered and refused the entry
    Rejected {
        code: String,
        message: Option<String>,
        sender_fault: bool,
    },
    /// The publish call carrying the entry failed as a whole
    Transport(String),
    /// The publish call carrying the entry did not finish in time
    TimedOut,
    /// Never sent: the invocation deadline passed first
    NotAttempted,
    /// Never sent: the entry alone exceeds the per-call byte limit
    Oversized,
    /// Never sent: the envelope could not be serialized
    Encoding(String),
}

impl FailureReason {
    /// Whether a publish call carrying the entry was issued
    pub fn was_attempted(&self) -> bool {
        matches!(
            self,
            FailureReason::Rejected { .. } | FailureReason::Transport(_) | FailureReason::TimedOut
        )
    }

    /// Short class name, used as the metrics label
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Rejected { .. } => "rejected",
            FailureReason::Transport(_) => "transport",
            FailureReason::TimedOut => "timed_out",
            FailureReason::NotAttempted => "not_attempted",
            FailureReason::Oversized => "oversized",
            FailureReason::Encoding(_) => "encoding",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected { code, message, .. } => match message {
                Some(message) => write!(f, "rejected by bus ({}): {}", code, message),
                None => write!(f, "rejected by bus ({})", code),
            },
            FailureReason::Transport(err) => write!(f, "publish call failed: {}", err),
            FailureReason::TimedOut => f.write_str("publish call timed out"),
            FailureReason::NotAttempted => f.write_str("not attempted before deadline"),
            FailureReason::Oversized => f.write_str("entry exceeds the batch byte limit"),
            FailureReason::Encoding(err) => write!(f, "envelope encoding failed: {}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub event_id: String,
    pub event_type: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub event_id: String,
    pub message_id: Option<String>,
}

/// Aggregate outcome of dispatching one sequence of events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Publish calls issued
    pub batches: usize,
    /// Entries carried by issued publish calls
    pub attempted: usize,
    /// Accepted entries, in input order
    pub receipts: Vec<Receipt>,
    /// Failed entries, in the order they were settled
    pub failures: Vec<EntryFailure>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn published(&self) -> usize {
        self.receipts.len()
    }

    pub fn failed_attempted(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.reason.was_attempted())
            .count()
    }

    pub fn failed_not_attempted(&self) -> usize {
        self.failures.len() - self.failed_attempted()
    }

    fn fail_all(&mut self, entries: Vec<PublishEntry>, reason: FailureReason) {
        self.failures
            .extend(entries.into_iter().map(|entry| EntryFailure {
                event_id: entry.event_id,
                event_type: entry.event_type,
                reason: reason.clone(),
            }));
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Destination topic
    pub topic: String,
    pub limits: BatchLimits,
    /// Upper bound of a single publish call
    pub publish_timeout: Duration,
}

impl DispatcherConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            limits: BatchLimits::default(),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Dispatcher<P: BatchPublisher> {
    publisher: Arc<P>,
    config: DispatcherConfig,
    metrics: Option<TransformerMetrics>,
}

impl<P: BatchPublisher> Dispatcher<P> {
    pub fn new(publisher: Arc<P>, config: DispatcherConfig) -> Self {
        Self {
            publisher,
            config,
            metrics: None,
        }
    }

    pub fn new_with_metrics(
        publisher: Arc<P>,
        config: DispatcherConfig,
        metrics: TransformerMetrics,
    ) -> Self {
        Self {
            publisher,
            config,
            metrics: Some(metrics),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Publish `events` in order.
    ///
    /// Each publish call is bounded by the configured per-call timeout and by
    /// `deadline`, whichever comes first. Once `deadline` has passed no further
    /// calls are issued and the remaining entries are reported
    /// [`FailureReason::NotAttempted`].
    pub async fn dispatch(
        &self,
        events: &[NormalizedEvent],
        deadline: Option<Instant>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if events.is_empty() {
            return report;
        }

        let mut entries = Vec::with_capacity(events.len());
        for event in events {
            match PublishEntry::from_event(event) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!(event_id = %event.id(), error = %e, "Failed to encode event envelope");
                    report.failures.push(EntryFailure {
                        event_id: event.id().to_string(),
                        event_type: event.event_type().to_string(),
                        reason: FailureReason::Encoding(e.to_string()),
                    });
                }
            }
        }

        for chunk in batching::pack(entries, self.config.limits, PublishEntry::size_bytes) {
            match chunk {
                Chunk::Oversized(entry) => {
                    warn!(
                        event_id = %entry.event_id,
                        size_bytes = entry.size_bytes(),
                        max_bytes = self.config.limits.max_bytes,
                        "Event exceeds the publish batch byte limit"
                    );
                    report.fail_all(vec![entry], FailureReason::Oversized);
                }
                Chunk::Publish(batch) => self.publish_chunk(batch, deadline, &mut report).await,
            }
        }

        self.record_metrics(&report);
        report
    }

    async fn publish_chunk(
        &self,
        batch: Vec<PublishEntry>,
        deadline: Option<Instant>,
        report: &mut DispatchReport,
    ) {
        let now = Instant::now();
        let budget = match deadline {
            Some(deadline) if deadline <= now => {
                debug!(entries = batch.len(), "Deadline passed, skipping publish call");
                report.fail_all(batch, FailureReason::NotAttempted);
                return;
            }
            Some(deadline) => (deadline - now).min(self.config.publish_timeout),
            None => self.config.publish_timeout,
        };

        report.batches += 1;
        report.attempted += batch.len();
        debug!(
            topic = %self.config.topic,
            entries = batch.len(),
            budget_ms = budget.as_millis() as u64,
            "Publishing batch"
        );

        let result = tokio::time::timeout(
            budget,
            self.publisher.publish_batch(&self.config.topic, &batch),
        )
        .await;
        let outcomes = match result {
            Ok(Ok(outcomes)) => outcomes,
            Ok(Err(e)) => {
                error!(topic = %self.config.topic, entries = batch.len(), error = %e, "Publish call failed");
                report.fail_all(batch, FailureReason::Transport(e.to_string()));
                return;
            }
            Err(_) => {
                error!(
                    topic = %self.config.topic,
                    entries = batch.len(),
                    budget_ms = budget.as_millis() as u64,
                    "Publish call timed out"
                );
                report.fail_all(batch, FailureReason::TimedOut);
                return;
            }
        };

        let mut slots: Vec<Option<EntryOutcome>> = vec![None; batch.len()];
        for (index, outcome) in outcomes {
            match slots.get_mut(index) {
                Some(slot) => *slot = Some(outcome),
                None => warn!(index, "Bus returned a result for an unknown entry"),
            }
        }

        for (entry, slot) in batch.into_iter().zip(slots) {
            match slot {
                Some(EntryOutcome::Accepted { message_id }) => report.receipts.push(Receipt {
                    event_id: entry.event_id,
                    message_id,
                }),
                Some(EntryOutcome::Rejected {
                    code,
                    message,
                    sender_fault,
                }) => {
                    warn!(
                        event_id = %entry.event_id,
                        event_type = %entry.event_type,
                        code = %code,
                        message = ?message,
                        sender_fault,
                        "Bus rejected event"
                    );
                    report.failures.push(EntryFailure {
                        event_id: entry.event_id,
                        event_type: entry.event_type,
                        reason: FailureReason::Rejected {
                            code,
                            message,
                            sender_fault,
                        },
                    });
                }
                None => {
                    warn!(event_id = %entry.event_id, "Bus returned no result for event");
                    report.failures.push(EntryFailure {
                        event_id: entry.event_id,
                        event_type: entry.event_type,
                        reason: FailureReason::Rejected {
                            code: "MissingResult".to_string(),
                            message: None,
                            sender_fault: false,
                        },
                    });
                }
            }
        }
    }

    fn record_metrics(&self, report: &DispatchReport) {
        if let Some(metrics) = &self.metrics {
            metrics.publish_batches.inc_by(report.batches as u64);
            metrics.events_published.inc_by(report.published() as u64);
            for failure in &report.failures {
                metrics
                    .events_failed
                    .with_label_values(&[failure.reason.label()])
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Publisher that answers from a script and records every call
    #[derive(Default)]
    struct ScriptedPublisher {
        calls: Mutex<Vec<Vec<String>>>,
        reject_ids: Vec<String>,
        fail_call: Option<usize>,
        stall_call: Option<usize>,
        drop_results: bool,
    }

    impl ScriptedPublisher {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchPublisher for ScriptedPublisher {
        async fn publish_batch(
            &self,
            _topic: &str,
            entries: &[PublishEntry],
        ) -> Result<Vec<(usize, EntryOutcome)>, PublishError> {
            let call_index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(entries.iter().map(|e| e.event_id.clone()).collect());
                calls.len() - 1
            };

            if self.stall_call == Some(call_index) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.fail_call == Some(call_index) {
                return Err(PublishError::Transport("connection reset".to_string()));
            }
            if self.drop_results {
                return Ok(Vec::new());
            }

            Ok(entries
                .iter()
                .enumerate()
                .map(|(index, entry)| {
                    let outcome = if self.reject_ids.contains(&entry.event_id) {
                        EntryOutcome::Rejected {
                            code: "InvalidParameter".to_string(),
                            message: Some("bad attribute".to_string()),
                            sender_fault: true,
                        }
                    } else {
                        EntryOutcome::Accepted {
                            message_id: Some(format!("msg-{}", entry.event_id)),
                        }
                    };
                    (index, outcome)
                })
                .collect())
        }
    }

    fn events(count: usize) -> Vec<NormalizedEvent> {
        (0..count)
            .map(|i| {
                NormalizedEvent::new(
                    format!("/order/{}", i),
                    format!("evt-{}", i),
                    "OrderCreated",
                    Utc::now(),
                )
                .unwrap()
            })
            .collect()
    }

    fn dispatcher(publisher: Arc<ScriptedPublisher>) -> Dispatcher<ScriptedPublisher> {
        Dispatcher::new(publisher, DispatcherConfig::new("arn:aws:sns:us-east-1:1:events"))
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let report = dispatcher(publisher.clone()).dispatch(&[], None).await;

        assert!(report.is_success());
        assert_eq!(report.batches, 0);
        assert!(publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let input = events(23);
        let report = dispatcher(publisher.clone()).dispatch(&input, None).await;

        assert!(report.is_success());
        assert_eq!(report.batches, 3);
        assert_eq!(report.published(), 23);

        let calls = publisher.calls();
        assert_eq!(
            calls.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 3]
        );
        let sent: Vec<String> = calls.into_iter().flatten().collect();
        let expected: Vec<String> = input.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(sent, expected);
        assert_eq!(report.receipts[22].message_id.as_deref(), Some("msg-evt-22"));
    }

    #[tokio::test]
    async fn test_partial_rejection_is_reported_per_entry() {
        let publisher = Arc::new(ScriptedPublisher {
            reject_ids: vec!["evt-1".to_string()],
            ..Default::default()
        });
        let report = dispatcher(publisher).dispatch(&events(3), None).await;

        assert!(!report.is_success());
        assert_eq!(report.published(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].event_id, "evt-1");
        assert!(matches!(
            &report.failures[0].reason,
            FailureReason::Rejected { code, sender_fault: true, .. } if code == "InvalidParameter"
        ));
        assert_eq!(report.failed_attempted(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_covers_only_its_batch() {
        let publisher = Arc::new(ScriptedPublisher {
            fail_call: Some(0),
            ..Default::default()
        });
        let report = dispatcher(publisher.clone()).dispatch(&events(12), None).await;

        assert_eq!(publisher.calls().len(), 2);
        assert_eq!(report.failures.len(), 10);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.reason, FailureReason::Transport(_))));
        assert_eq!(report.published(), 2);
    }

    #[tokio::test]
    async fn test_missing_results_count_as_rejections() {
        let publisher = Arc::new(ScriptedPublisher {
            drop_results: true,
            ..Default::default()
        });
        let report = dispatcher(publisher).dispatch(&events(2), None).await;

        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            &report.failures[0].reason,
            FailureReason::Rejected { code, .. } if code == "MissingResult"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_batch_and_continues() {
        let publisher = Arc::new(ScriptedPublisher {
            stall_call: Some(0),
            ..Default::default()
        });
        let report = dispatcher(publisher.clone()).dispatch(&events(15), None).await;

        assert_eq!(publisher.calls().len(), 2);
        assert_eq!(report.batches, 2);
        assert_eq!(
            report
                .failures
                .iter()
                .filter(|f| f.reason == FailureReason::TimedOut)
                .count(),
            10
        );
        assert_eq!(report.published(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_further_calls() {
        let publisher = Arc::new(ScriptedPublisher {
            stall_call: Some(0),
            ..Default::default()
        });
        let mut config = DispatcherConfig::new("topic");
        config.publish_timeout = Duration::from_secs(30);
        let dispatcher = Dispatcher::new(publisher.clone(), config);

        let deadline = Instant::now() + Duration::from_secs(2);
        let report = dispatcher.dispatch(&events(25), Some(deadline)).await;

        assert_eq!(publisher.calls().len(), 1);
        assert_eq!(report.attempted, 10);
        assert_eq!(report.failed_attempted(), 10);
        assert_eq!(report.failed_not_attempted(), 15);
        assert!(report.failures[10..]
            .iter()
            .all(|f| f.reason == FailureReason::NotAttempted));
    }

    #[tokio::test]
    async fn test_oversized_event_is_reported_without_a_call() {
        let publisher = Arc::new(ScriptedPublisher::default());
        let mut config = DispatcherConfig::new("topic");
        config.limits = BatchLimits::clamped(10, 300);
        let dispatcher = Dispatcher::new(publisher.clone(), config);

        let mut input = events(2);
        input.insert(
            1,
            NormalizedEvent::new("/order/big", "evt-big", "OrderCreated", Utc::now())
                .unwrap()
                .with_payload(Some(serde_json::json!({ "blob": "x".repeat(1_000) }))),
        );
        let report = dispatcher.dispatch(&input, None).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].event_id, "evt-big");
        assert_eq!(report.failures[0].reason, FailureReason::Oversized);
        assert_eq!(report.failed_not_attempted(), 1);
        assert_eq!(report.published(), 2);
    }

    #[test]
    fn test_publish_entry_attributes() {
        let event = events(1).remove(0);
        let entry = PublishEntry::from_event(&event).unwrap();

        assert_eq!(
            entry.attributes,
            vec![
                ("event_type".to_string(), "OrderCreated".to_string()),
                ("event_source".to_string(), "/order/0".to_string()),
            ]
        );
        assert_eq!(
            entry.size_bytes(),
            entry.body.len()
                + "event_type".len()
                + 6
                + "OrderCreated".len()
                + "event_source".len()
                + 6
                + "/order/0".len()
        );
    }
}
