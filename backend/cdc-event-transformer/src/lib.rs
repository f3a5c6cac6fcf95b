//! # CDC Event Transformer
//!
//! Turns raw change records captured from a datastore change stream into
//! normalized event envelopes and publishes them to an SNS topic.
//!
//! ```text
//! records ──> Normalizer ──> [NormalizedEvent, ...] ──> Dispatcher ──> SNS PublishBatch
//!               │                                          │
//!               └─ malformed records dropped (counted)     └─ per-entry outcomes folded
//!                                                             into a DispatchReport
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use cdc_event_transformer::{
//!     record, Config, Dispatcher, InvocationHandler, Normalizer, SnsBatchPublisher,
//! };
//! use std::sync::Arc;
//! use tokio::time::Instant;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let publisher = Arc::new(SnsBatchPublisher::from_env().await);
//!
//!     let handler = InvocationHandler::new(
//!         Normalizer::new(config.normalizer_config()),
//!         Dispatcher::new(publisher, config.dispatcher_config()),
//!     );
//!
//!     let batch = record::parse_batch(r#"{"Records": []}"#)?;
//!     let deadline = Instant::now() + config.invocation_timeout();
//!     let summary = handler.handle_parsed(&batch, Some(deadline)).await?;
//!     println!("{}", summary);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod metrics;
pub mod normalizer;
pub mod record;

pub use config::{Config, ConfigError};
pub use dispatcher::{
    BatchPublisher, DispatchReport, Dispatcher, DispatcherConfig, EntryFailure, EntryOutcome,
    FailureReason, PublishEntry, PublishError, SnsBatchPublisher,
};
pub use handler::{HandlerError, InvocationHandler, InvocationSummary};
pub use metrics::TransformerMetrics;
pub use normalizer::{NormalizedBatch, Normalizer, NormalizerConfig, PayloadPolicy};
pub use record::{AttributeValue, Image, ParsedBatch, RawChangeRecord};

pub use event_schema::NormalizedEvent;
