//! Time-partitioned object path formatting.
//!
//! Layout: `base/event_type/YYYY/MM/DD/HH/mm/{event_type}_{stamp}.json`
//! where `stamp` is the ingestion timestamp at microsecond resolution.
//! Deterministic, no I/O; the microsecond stamp makes per-type collisions
//! vanishingly rare rather than impossible.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::EventError;
use crate::event::{self, COMPACT_TIME_FORMAT};

/// Build the partitioned object path for an event.
///
/// `ingestion_time` is the stamp the decoder wrote; anything unparsable is
/// an invariant violation and returns an error rather than being skipped.
pub fn object_path(
    base: &str,
    event_type: &str,
    ingestion_time: &str,
) -> Result<String, EventError> {
    let at = event::parse_ingestion_time(ingestion_time)?;
    Ok(partitioned_path(base, event_type, at))
}

/// Build the partitioned path from an already-parsed timestamp.
pub fn partitioned_path(base: &str, event_type: &str, at: DateTime<Utc>) -> String {
    let base = base.trim_end_matches('/');
    format!(
        "{}/{}/{:04}/{:02}/{:02}/{:02}/{:02}/{}",
        base,
        event_type,
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        file_name(event_type, at),
    )
}

/// The object file name: `{event_type}_{YYYYMMDDHHMMSSffffff}.json`.
pub fn file_name(event_type: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.json", event_type, at.format(COMPACT_TIME_FORMAT))
}
