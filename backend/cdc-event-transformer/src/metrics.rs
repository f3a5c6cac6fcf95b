use prometheus::{IntCounter, IntCounterVec, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct TransformerMetrics {
    pub records_received: IntCounter,
    pub records_dropped: IntCounter,
    pub events_published: IntCounter,
    pub events_failed: IntCounterVec,
    pub publish_batches: IntCounter,
}

impl TransformerMetrics {
    pub fn new(service: &str) -> Self {
        let registry = prometheus::default_registry();

        let records_received = IntCounter::with_opts(
            Opts::new(
                "cdc_records_received_total",
                "Total number of change records received",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for cdc_records_received_total");

        let records_dropped = IntCounter::with_opts(
            Opts::new(
                "cdc_records_dropped_total",
                "Total number of change records dropped as malformed",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for cdc_records_dropped_total");

        let events_published = IntCounter::with_opts(
            Opts::new(
                "cdc_events_published_total",
                "Total number of events accepted by the message bus",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for cdc_events_published_total");

        let events_failed = IntCounterVec::new(
            Opts::new(
                "cdc_events_failed_total",
                "Total number of events not published, by failure reason",
            )
            .const_label("service", service.to_string()),
            &["reason"],
        )
        .expect("valid metric opts for cdc_events_failed_total");

        let publish_batches = IntCounter::with_opts(
            Opts::new(
                "cdc_publish_batches_total",
                "Total number of batch-publish calls issued",
            )
            .const_label("service", service.to_string()),
        )
        .expect("valid metric opts for cdc_publish_batches_total");

        for metric in [
            Box::new(records_received.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(records_dropped.clone()),
            Box::new(events_published.clone()),
            Box::new(events_failed.clone()),
            Box::new(publish_batches.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register transformer metric: {}", e);
            }
        }

        Self {
            records_received,
            records_dropped,
            events_published,
            events_failed,
            publish_batches,
        }
    }
}
