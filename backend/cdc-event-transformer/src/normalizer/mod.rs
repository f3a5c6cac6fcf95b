//! Change record normalization.
//!
//! Turns one [`RawChangeRecord`] into zero or one [`NormalizedEvent`]. Malformed
//! records are filtered here and never surface as errors; the only trace they
//! leave is a `debug` log line and the dropped count of [`NormalizedBatch`].

mod casing;

pub use casing::PathCasing;

use crate::record::{fields, image_str, image_to_json, RawChangeRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use event_schema::{ChangeKind, NormalizedEvent, UNKNOWN_ACTOR};
use std::fmt;
use tracing::debug;

/// Default format of the embedded `__time` field (`YYYY-MM-DDThh:mm:ssZZZZ`)
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// What the envelope carries as its data body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadPolicy {
    /// No data body
    #[default]
    Omit,
    /// The full post-change image as plain JSON
    AfterImage,
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// chrono format string used to parse the embedded event time
    pub time_format: String,
    pub path_casing: PathCasing,
    pub payload_policy: PayloadPolicy,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            path_casing: PathCasing::default(),
            payload_policy: PayloadPolicy::default(),
        }
    }
}

/// Why a record produced no event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingImages,
    MissingTypeTag,
    MissingIdentity,
    MissingRecordId,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::MissingImages => "record carries neither a before nor an after image",
            DropReason::MissingTypeTag => "entity type tag is missing",
            DropReason::MissingIdentity => "entity identity is missing",
            DropReason::MissingRecordId => "stream record id is missing",
        };
        f.write_str(reason)
    }
}

/// Events of one incoming batch, in input order
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub events: Vec<NormalizedEvent>,
    pub dropped: usize,
}

pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Check that a record can become an event.
    ///
    /// The type tag and identity are read from the relevant image: `after` when
    /// present, `before` for deletions.
    pub fn validate(&self, record: &RawChangeRecord) -> Result<(), DropReason> {
        let image = record.relevant_image().ok_or(DropReason::MissingImages)?;

        if image_str(Some(image), fields::TYPE_TAG).is_empty() {
            return Err(DropReason::MissingTypeTag);
        }
        if image_str(Some(image), fields::IDENTITY).is_empty() {
            return Err(DropReason::MissingIdentity);
        }
        if record.record_id.is_empty() {
            return Err(DropReason::MissingRecordId);
        }
        Ok(())
    }

    pub fn is_valid(&self, record: &RawChangeRecord) -> bool {
        self.validate(record).is_ok()
    }

    pub fn change_kind(&self, record: &RawChangeRecord) -> ChangeKind {
        match (&record.before, &record.after) {
            (None, Some(_)) => ChangeKind::Created,
            (Some(_), Some(_)) => ChangeKind::Updated,
            _ => ChangeKind::Deleted,
        }
    }

    pub fn derive_type(&self, record: &RawChangeRecord) -> String {
        let entity = image_str(record.relevant_image(), fields::TYPE_TAG);
        self.change_kind(record).event_type(entity)
    }

    pub fn derive_source(&self, record: &RawChangeRecord) -> String {
        let image = record.relevant_image();
        let entity = image_str(image, fields::TYPE_TAG);
        let identity = image_str(image, fields::IDENTITY);
        format!("/{}/{}", self.config.path_casing.apply(entity), identity)
    }

    pub fn derive_id(&self, record: &RawChangeRecord) -> String {
        record.record_id.clone()
    }

    /// Embedded `__time` of the after image, or the stream's approximate change time
    /// when it is absent or does not match the configured format.
    pub fn derive_time(&self, record: &RawChangeRecord) -> DateTime<Utc> {
        let raw = image_str(record.after.as_ref(), fields::EVENT_TIME);
        if raw.is_empty() {
            return record.approximate_change_time;
        }

        match self.parse_time(raw) {
            Some(time) => time,
            None => {
                debug!(
                    record_id = %record.record_id,
                    raw_time = %raw,
                    time_format = %self.config.time_format,
                    "Embedded event time unparsable, using approximate change time"
                );
                record.approximate_change_time
            }
        }
    }

    fn parse_time(&self, raw: &str) -> Option<DateTime<Utc>> {
        let format = self.config.time_format.as_str();
        if let Ok(time) = DateTime::parse_from_str(raw, format) {
            return Some(time.with_timezone(&Utc));
        }
        // formats without a zone are read as UTC
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn derive_subject(&self, record: &RawChangeRecord) -> Option<String> {
        let actor = image_str(record.after.as_ref(), fields::ACTOR);
        if actor.is_empty() {
            None
        } else {
            Some(actor.to_string())
        }
    }

    pub fn derive_actor(&self, record: &RawChangeRecord) -> String {
        let actor = image_str(record.after.as_ref(), fields::ACTOR);
        if actor.is_empty() {
            UNKNOWN_ACTOR.to_string()
        } else {
            actor.to_string()
        }
    }

    pub fn derive_payload(&self, record: &RawChangeRecord) -> Option<serde_json::Value> {
        match self.config.payload_policy {
            PayloadPolicy::Omit => None,
            PayloadPolicy::AfterImage => record.after.as_ref().map(image_to_json),
        }
    }

    /// Normalize a single record, or `None` when it must be dropped.
    pub fn normalize(&self, record: &RawChangeRecord) -> Option<NormalizedEvent> {
        self.try_normalize(record).ok()
    }

    fn try_normalize(&self, record: &RawChangeRecord) -> Result<NormalizedEvent, DropReason> {
        self.validate(record)?;

        let event = NormalizedEvent::new(
            self.derive_source(record),
            self.derive_id(record),
            self.derive_type(record),
            self.derive_time(record),
        )
        .map_err(|_| DropReason::MissingRecordId)?;

        Ok(event
            .with_subject(self.derive_subject(record))
            .with_actor(self.derive_actor(record))
            .with_payload(self.derive_payload(record)))
    }

    /// Normalize every record of a batch, keeping input order.
    pub fn normalize_batch(&self, records: &[RawChangeRecord]) -> NormalizedBatch {
        let mut batch = NormalizedBatch {
            events: Vec::with_capacity(records.len()),
            dropped: 0,
        };

        for record in records {
            match self.try_normalize(record) {
                Ok(event) => batch.events.push(event),
                Err(reason) => {
                    debug!(
                        record_id = %record.record_id,
                        reason = ?reason,
                        "Dropping change record: {}",
                        reason
                    );
                    batch.dropped += 1;
                }
            }
        }

        batch
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}
