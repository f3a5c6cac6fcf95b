//! Raw change records as delivered by the change stream.
//!
//! Records arrive in the DynamoDB Streams JSON shape: every image is a map of
//! typed attribute values (`{"S": "..."}`, `{"N": "..."}`, ...). This module turns
//! that wire shape into [`RawChangeRecord`] and offers the string/JSON views the
//! normalizer reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Reserved field names carried inside record images
pub mod fields {
    /// Entity type tag, e.g. `Order`
    pub const TYPE_TAG: &str = "__typename";
    /// Identity of the entity
    pub const IDENTITY: &str = "id";
    /// Embedded event time
    pub const EVENT_TIME: &str = "__time";
    /// Actor that made the change
    pub const ACTOR: &str = "__user";
}

/// One typed attribute of a record image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "M")]
    Map(HashMap<String, AttributeValue>),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
}

impl AttributeValue {
    /// String content of a string attribute; every other attribute type has none.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Plain JSON view of the attribute
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            AttributeValue::String(s) | AttributeValue::Binary(s) => Value::String(s.clone()),
            AttributeValue::Number(n) => number_to_json(n),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::Map(m) => image_to_json(m),
            AttributeValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            AttributeValue::StringSet(items) | AttributeValue::BinarySet(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            AttributeValue::NumberSet(items) => {
                Value::Array(items.iter().map(|n| number_to_json(n)).collect())
            }
        }
    }
}

/// Significant decimal digits an `f64` always carries exactly
const F64_EXACT_DIGITS: usize = 15;

/// JSON number when the text fits one without losing digits, otherwise the text itself.
/// DynamoDB numbers carry up to 38 significant digits.
fn number_to_json(raw: &str) -> serde_json::Value {
    if let Ok(i) = raw.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    if let Ok(u) = raw.parse::<u64>() {
        return serde_json::Value::from(u);
    }
    if significant_digits(raw) <= F64_EXACT_DIGITS {
        if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(raw.to_string())
}

fn significant_digits(raw: &str) -> usize {
    let mantissa = raw.split(|c| c == 'e' || c == 'E').next().unwrap_or("");
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    digits.trim_start_matches('0').trim_end_matches('0').len()
}

/// Field name -> attribute mapping of one side of a change
pub type Image = HashMap<String, AttributeValue>;

/// Plain JSON object view of an image
pub fn image_to_json(image: &Image) -> serde_json::Value {
    let object: serde_json::Map<String, serde_json::Value> = image
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::Value::Object(object)
}

/// Read a string field of an image; missing fields and non-string attributes read as empty.
pub fn image_str<'a>(image: Option<&'a Image>, field: &str) -> &'a str {
    image
        .and_then(|image| image.get(field))
        .and_then(AttributeValue::as_str)
        .unwrap_or("")
}

/// A single create/update/delete captured from the source datastore
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "StreamRecordWire")]
pub struct RawChangeRecord {
    /// Unique per change, assigned by the stream
    pub record_id: String,
    /// Change time as approximated by the stream
    pub approximate_change_time: DateTime<Utc>,
    /// Image before the change (absent on creation)
    pub before: Option<Image>,
    /// Image after the change (absent on deletion)
    pub after: Option<Image>,
}

impl RawChangeRecord {
    pub fn new(record_id: impl Into<String>, approximate_change_time: DateTime<Utc>) -> Self {
        Self {
            record_id: record_id.into(),
            approximate_change_time,
            before: None,
            after: None,
        }
    }

    pub fn with_before(mut self, image: Image) -> Self {
        self.before = Some(image);
        self
    }

    pub fn with_after(mut self, image: Image) -> Self {
        self.after = Some(image);
        self
    }

    /// `after` when present, otherwise `before`
    pub fn relevant_image(&self) -> Option<&Image> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct StreamRecordWire {
    #[serde(rename = "eventID")]
    event_id: String,
    #[serde(rename = "dynamodb")]
    change: ChangeWire,
}

#[derive(Debug, Deserialize)]
struct ChangeWire {
    #[serde(
        rename = "ApproximateCreationDateTime",
        deserialize_with = "deserialize_epoch_seconds"
    )]
    approximate_creation_date_time: DateTime<Utc>,
    #[serde(rename = "NewImage", default)]
    new_image: Option<Image>,
    #[serde(rename = "OldImage", default)]
    old_image: Option<Image>,
}

impl From<StreamRecordWire> for RawChangeRecord {
    fn from(wire: StreamRecordWire) -> Self {
        Self {
            record_id: wire.event_id,
            approximate_change_time: wire.change.approximate_creation_date_time,
            before: wire.change.old_image,
            after: wire.change.new_image,
        }
    }
}

fn deserialize_epoch_seconds<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    if !seconds.is_finite() {
        return Err(serde::de::Error::custom("epoch seconds must be finite"));
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| serde::de::Error::custom(format!("epoch seconds out of range: {}", seconds)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchWire {
    Event {
        #[serde(rename = "Records")]
        records: Vec<serde_json::Value>,
    },
    Bare(Vec<serde_json::Value>),
}

/// Records of one incoming batch, plus how many could not be read at all
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub records: Vec<RawChangeRecord>,
    /// Entries that did not match the stream record shape
    pub malformed: usize,
}

/// Parse a batch of stream records, either a bare JSON array or a `{"Records": [...]}` event.
///
/// Only a batch that is not a list of records at all is an error. Entries that
/// fail to deserialize individually are skipped and counted in
/// [`ParsedBatch::malformed`].
pub fn parse_batch(input: &str) -> Result<ParsedBatch, serde_json::Error> {
    let entries = match serde_json::from_str::<BatchWire>(input)? {
        BatchWire::Event { records } => records,
        BatchWire::Bare(records) => records,
    };

    let mut batch = ParsedBatch::default();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<RawChangeRecord>(entry) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(index, error = %e, "Dropping unreadable stream record");
                batch.malformed += 1;
            }
        }
    }
    Ok(batch)
}
