//! Envelope decoding: raw queue payload to validated event.
//!
//! A payload must be UTF-8 text containing a JSON object. Anything else is
//! rejected, counted on the invalid-message counter, and logged with a
//! truncated preview; the payload is never persisted and never retried here
//! (redelivery is the queue's concern).

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::error::DecodeError;
use crate::event::Event;
use crate::metrics::PipelineMetrics;

/// Maximum payload bytes echoed into log lines.
const PREVIEW_LIMIT: usize = 256;

/// Decodes raw payloads into stamped events.
///
/// Holds the metrics handle it counts rejections on; constructed once by the
/// orchestrator and shared by workers.
#[derive(Clone)]
pub struct Decoder {
    metrics: Arc<PipelineMetrics>,
}

impl Decoder {
    /// Create a decoder counting rejections on the given metrics handle.
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self { metrics }
    }

    /// Decode a raw payload into an event stamped with the current UTC time.
    ///
    /// On failure, increments the invalid-message counter and logs the
    /// payload preview; the error never propagates past the calling worker.
    pub fn decode(&self, raw: &[u8]) -> Result<Event, DecodeError> {
        match Self::try_decode(raw) {
            Ok(event) => Ok(event),
            Err(err) => {
                self.metrics.record_invalid_message();
                error!(error = %err, "Rejected payload");
                Err(err)
            }
        }
    }

    fn try_decode(raw: &[u8]) -> Result<Event, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|e| DecodeError::Malformed {
            reason: format!("invalid UTF-8: {}", e),
            preview: preview(raw),
        })?;

        let value: Value = serde_json::from_str(text).map_err(|e| {
            use serde_json::error::Category;
            match e.classify() {
                Category::Syntax | Category::Eof => DecodeError::Malformed {
                    reason: format!("invalid JSON: {}", e),
                    preview: preview(raw),
                },
                Category::Data | Category::Io => DecodeError::Unexpected {
                    reason: e.to_string(),
                    preview: preview(raw),
                },
            }
        })?;

        let mut event = Event::from_value(value).ok_or_else(|| DecodeError::Malformed {
            reason: "top-level JSON value is not an object".to_string(),
            preview: preview(raw),
        })?;

        event.stamp_ingestion_time(Utc::now());
        Ok(event)
    }
}

/// Lossy, truncated payload excerpt for log lines.
fn preview(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut preview: String = text.chars().take(PREVIEW_LIMIT).collect();
    if text.chars().count() > PREVIEW_LIMIT {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> (Decoder, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        (Decoder::new(Arc::clone(&metrics)), metrics)
    }

    #[test]
    fn test_decode_valid_payload() {
        let (decoder, metrics) = decoder();
        let event = decoder
            .decode(br#"{"event_type": "order", "order_id": "o-1"}"#)
            .unwrap();

        assert_eq!(event.event_type(), Some("order"));
        // The stamp must be present and parse back to a real timestamp
        assert!(event.ingestion_datetime().is_ok());
        assert_eq!(metrics.invalid_messages_total(), 0);
    }

    #[test]
    fn test_decode_stamp_has_microsecond_precision() {
        let (decoder, _) = decoder();
        let event = decoder.decode(br#"{"event_type": "order"}"#).unwrap();
        let stamp = event.ingestion_time().unwrap();

        // 2024-03-05T14:07:22.123456Z - fractional part is six digits
        let fractional = stamp.split('.').nth(1).unwrap();
        assert_eq!(fractional.len(), "123456Z".len());
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn test_decode_invalid_utf8_counts_once() {
        let (decoder, metrics) = decoder();
        let result = decoder.decode(&[0xff, 0xfe, 0x80]);

        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
        assert_eq!(metrics.invalid_messages_total(), 1);
    }

    #[test]
    fn test_decode_invalid_json_counts_once() {
        let (decoder, metrics) = decoder();
        let result = decoder.decode(b"{not json");

        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
        assert_eq!(metrics.invalid_messages_total(), 1);
    }

    #[test]
    fn test_decode_non_object_top_level_counts_once() {
        let (decoder, metrics) = decoder();

        for payload in [&b"[1, 2, 3]"[..], b"\"order\"", b"42", b"null", b"true"] {
            let result = decoder.decode(payload);
            assert!(
                matches!(result, Err(DecodeError::Malformed { .. })),
                "payload {:?} should be rejected",
                String::from_utf8_lossy(payload)
            );
        }
        assert_eq!(metrics.invalid_messages_total(), 5);
    }

    #[test]
    fn test_decode_empty_payload_rejected() {
        let (decoder, metrics) = decoder();
        assert!(decoder.decode(b"").is_err());
        assert_eq!(metrics.invalid_messages_total(), 1);
    }

    #[test]
    fn test_decode_preserves_unknown_fields() {
        let (decoder, _) = decoder();
        let event = decoder
            .decode(br#"{"event_type": "order", "custom": {"a": [1, 2]}}"#)
            .unwrap();

        assert_eq!(
            event.get("custom"),
            Some(&serde_json::json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn test_decode_does_not_panic_on_garbage() {
        let (decoder, _) = decoder();
        for len in 0..64 {
            let garbage: Vec<u8> = (0..len).map(|i| (i * 37 % 251) as u8).collect();
            let _ = decoder.decode(&garbage);
        }
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(PREVIEW_LIMIT * 2);
        let p = preview(long.as_bytes());
        assert!(p.len() < long.len());
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_concurrent_decode_failures_count_exactly() {
        let (decoder, metrics) = decoder();
        let workers = 32;

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let decoder = decoder.clone();
                std::thread::spawn(move || {
                    let _ = decoder.decode(b"not json at all");
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.invalid_messages_total(), workers);
    }
}
