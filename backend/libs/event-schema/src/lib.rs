//! Event envelope published to the message bus for every captured change
//!
//! The envelope is self-describing: consumers learn what changed (`type`),
//! which entity changed (`source`), when and by whom, without knowing the
//! source datastore's internal record format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type of every envelope body
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Actor reported when a change carries no actor of its own
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Message attribute names attached to each bus entry for subscription filtering
pub mod attributes {
    pub const EVENT_TYPE: &str = "event_type";
    pub const EVENT_SOURCE: &str = "event_source";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope field must not be empty: {0}")]
    EmptyField(&'static str),
}

/// Lifecycle verb of a change, decided by which images a change record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "Created",
            ChangeKind::Updated => "Updated",
            ChangeKind::Deleted => "Deleted",
        }
    }

    /// Compose the event type for an entity, e.g. `Order` + `Created` -> `OrderCreated`.
    ///
    /// The entity token is used verbatim.
    pub fn event_type(&self, entity: &str) -> String {
        format!("{}{}", entity, self.as_str())
    }
}

/// Normalized change event
///
/// Built once by the normalizer and never mutated afterwards; fields are only
/// reachable through accessors. `source`, `id` and `type` are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Path of the changed entity, e.g. `/order/42`
    source: String,
    /// Globally unique event id, inherited from the change stream
    id: String,
    /// `<Entity>Created`, `<Entity>Updated` or `<Entity>Deleted`
    #[serde(rename = "type")]
    event_type: String,
    /// Authoritative event time
    #[serde(rename = "time")]
    occurred_at: DateTime<Utc>,
    /// Actor recorded on the change, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    /// Actor recorded on the change, or [`UNKNOWN_ACTOR`]
    actor: String,
    #[serde(rename = "datacontenttype")]
    content_type: String,
    /// Domain body of the change
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
}

impl NormalizedEvent {
    pub fn new(
        source: impl Into<String>,
        id: impl Into<String>,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let source = source.into();
        let id = id.into();
        let event_type = event_type.into();

        if source.is_empty() {
            return Err(EnvelopeError::EmptyField("source"));
        }
        if id.is_empty() {
            return Err(EnvelopeError::EmptyField("id"));
        }
        if event_type.is_empty() {
            return Err(EnvelopeError::EmptyField("type"));
        }

        Ok(Self {
            source,
            id,
            event_type,
            occurred_at,
            subject: None,
            actor: UNKNOWN_ACTOR.to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            payload: None,
        })
    }

    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Serialize the envelope into the message body sent to the bus
    pub fn to_message_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
