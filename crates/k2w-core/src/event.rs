//! Decoded event model.
//!
//! An [`Event`] is a dynamically-shaped JSON object: a mapping from field
//! name to JSON value. Schemas differ per event type and unknown fields must
//! flow through untouched until the warehouse sink projects them, so the
//! representation stays a tagged-union value map rather than a fixed struct.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// Discriminator field read by the router.
pub const EVENT_TYPE_FIELD: &str = "event_type";

/// Timestamp field stamped by the decoder.
pub const INGESTION_TIME_FIELD: &str = "ingestion_time";

/// Compact timestamp layout used in object file names:
/// `YYYYMMDDHHMMSS` followed by six microsecond digits.
pub const COMPACT_TIME_FORMAT: &str = "%Y%m%d%H%M%S%6f";

/// A decoded, enriched event.
///
/// Always holds a JSON object; construction from any other JSON shape is
/// rejected at the decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Wrap an already-parsed JSON object.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Wrap a JSON value, rejecting anything but a top-level object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Look up a field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field, replacing any existing value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// The declared event type, if present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.fields.get(EVENT_TYPE_FIELD).and_then(Value::as_str)
    }

    /// The stamped ingestion time, if present and a string.
    pub fn ingestion_time(&self) -> Option<&str> {
        self.fields
            .get(INGESTION_TIME_FIELD)
            .and_then(Value::as_str)
    }

    /// Parse the stamped ingestion time back into a UTC timestamp.
    ///
    /// The decoder stamps every event, so a missing or unparsable value here
    /// is an invariant violation, not a data error.
    pub fn ingestion_datetime(&self) -> Result<DateTime<Utc>, EventError> {
        let raw = self
            .ingestion_time()
            .ok_or(EventError::MissingIngestionTime)?;
        parse_ingestion_time(raw)
    }

    /// Stamp the event with the given ingestion timestamp.
    pub fn stamp_ingestion_time(&mut self, at: DateTime<Utc>) {
        self.fields.insert(
            INGESTION_TIME_FIELD.to_string(),
            Value::String(format_ingestion_time(at)),
        );
    }

    /// Serialize to a single UTF-8 JSON document (the object sink's file
    /// content).
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.fields)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the event, yielding the field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Format a UTC timestamp the way the decoder stamps `ingestion_time`:
/// ISO-8601 with microsecond precision and a `Z` suffix.
pub fn format_ingestion_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an `ingestion_time` value back into a UTC timestamp.
pub fn parse_ingestion_time(raw: &str) -> Result<DateTime<Utc>, EventError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EventError::BadIngestionTime {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
