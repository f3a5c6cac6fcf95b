//! Invocation entry point: one call per incoming batch of change records.

use crate::dispatcher::{BatchPublisher, DispatchReport, Dispatcher};
use crate::metrics::TransformerMetrics;
use crate::normalizer::Normalizer;
use crate::record::{ParsedBatch, RawChangeRecord};
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

/// Counts of a fully published invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationSummary {
    /// Records handed to the invocation
    pub received: usize,
    /// Records filtered out as malformed
    pub dropped: usize,
    /// Events accepted by the bus
    pub published: usize,
}

impl fmt::Display for InvocationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} dropped={} published={}",
            self.received, self.dropped, self.published
        )
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    /// Some events were not published; `report` lists them and why
    #[error("{}", unpublished_message(.summary, .report))]
    Unpublished {
        summary: InvocationSummary,
        report: DispatchReport,
    },
}

fn unpublished_message(summary: &InvocationSummary, report: &DispatchReport) -> String {
    format!(
        "{} of {} events not published ({} attempted and failed, {} not attempted); {}",
        report.failures.len(),
        report.failures.len() + report.published(),
        report.failed_attempted(),
        report.failed_not_attempted(),
        summary
    )
}

impl HandlerError {
    pub fn report(&self) -> &DispatchReport {
        match self {
            HandlerError::Unpublished { report, .. } => report,
        }
    }
}

pub struct InvocationHandler<P: BatchPublisher> {
    normalizer: Normalizer,
    dispatcher: Dispatcher<P>,
    metrics: Option<TransformerMetrics>,
}

impl<P: BatchPublisher> InvocationHandler<P> {
    pub fn new(normalizer: Normalizer, dispatcher: Dispatcher<P>) -> Self {
        Self {
            normalizer,
            dispatcher,
            metrics: None,
        }
    }

    /// Create a handler that also updates Prometheus metrics per invocation.
    ///
    /// Pass the same metrics to [`Dispatcher::new_with_metrics`] to get publish counters.
    pub fn new_with_metrics(
        normalizer: Normalizer,
        dispatcher: Dispatcher<P>,
        metrics: TransformerMetrics,
    ) -> Self {
        Self {
            normalizer,
            dispatcher,
            metrics: Some(metrics),
        }
    }

    /// Normalize and publish one batch of change records.
    ///
    /// Malformed records are dropped and counted. Publication stops at
    /// `deadline`; everything left unpublished is reported in the error.
    pub async fn handle(
        &self,
        records: &[RawChangeRecord],
        deadline: Option<Instant>,
    ) -> Result<InvocationSummary, HandlerError> {
        self.process(records, 0, deadline).await
    }

    /// Like [`handle`](Self::handle), for a batch read from the wire.
    ///
    /// Entries the parser could not read count as received and dropped.
    pub async fn handle_parsed(
        &self,
        batch: &ParsedBatch,
        deadline: Option<Instant>,
    ) -> Result<InvocationSummary, HandlerError> {
        self.process(&batch.records, batch.malformed, deadline).await
    }

    async fn process(
        &self,
        records: &[RawChangeRecord],
        unreadable: usize,
        deadline: Option<Instant>,
    ) -> Result<InvocationSummary, HandlerError> {
        let received = records.len() + unreadable;
        info!(
            records = received,
            unreadable,
            topic = %self.dispatcher.config().topic,
            "Processing change records"
        );

        let batch = self.normalizer.normalize_batch(records);
        let dropped = batch.dropped + unreadable;

        if let Some(metrics) = &self.metrics {
            metrics.records_received.inc_by(received as u64);
            metrics.records_dropped.inc_by(dropped as u64);
        }

        let report = self.dispatcher.dispatch(&batch.events, deadline).await;

        let summary = InvocationSummary {
            received,
            dropped,
            published: report.published(),
        };

        if report.is_success() {
            info!(
                received = summary.received,
                dropped = summary.dropped,
                published = summary.published,
                batches = report.batches,
                "Change records published"
            );
            Ok(summary)
        } else {
            error!(
                received = summary.received,
                dropped = summary.dropped,
                published = summary.published,
                failed = report.failures.len(),
                not_attempted = report.failed_not_attempted(),
                "Change records partially published"
            );
            Err(HandlerError::Unpublished { summary, report })
        }
    }
}
