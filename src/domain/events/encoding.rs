//! Queue payload encoding
//!
//! Events cross the queue as compact MessagePack. The record carries the
//! enrichment results (server timestamp, fingerprint) plus the enqueue time,
//! so a worker can decode and persist without consulting anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{Importance, LogEvent, LogLevel, LogType};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Queue-resident representation of one enriched event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub project_id: i64,
    pub timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub level: LogLevel,
    pub log_type: LogType,
    pub importance: Importance,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub message: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub sdk_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: Option<String>,
    pub error_fingerprint: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedEvent {
    pub fn from_event(
        event: LogEvent,
        project_id: i64,
        ingested_at: DateTime<Utc>,
        error_fingerprint: Option<String>,
    ) -> Self {
        Self {
            project_id,
            timestamp: event.timestamp,
            ingested_at,
            level: event.level,
            log_type: event.log_type,
            importance: event.importance,
            environment: event.environment,
            release: event.release,
            message: event.message,
            error_type: event.error_type,
            error_message: event.error_message,
            stack_trace: event.stack_trace,
            attributes: event.attributes,
            sdk_version: event.sdk_version,
            platform: event.platform,
            platform_version: event.platform_version,
            error_fingerprint,
            enqueued_at: ingested_at,
        }
    }
}

pub fn encode(event: &QueuedEvent) -> Result<Vec<u8>, EncodeError> {
    rmp_serde::to_vec(event).map_err(|e| EncodeError::Encode(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<QueuedEvent, EncodeError> {
    rmp_serde::from_slice(bytes).map_err(|e| EncodeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueuedEvent {
        QueuedEvent {
            project_id: 7,
            timestamp: "2025-11-14T10:00:00Z".parse().unwrap(),
            ingested_at: "2025-11-14T10:00:01Z".parse().unwrap(),
            level: LogLevel::Error,
            log_type: LogType::Exception,
            importance: Importance::High,
            environment: Some("production".into()),
            release: Some("v1.2.3".into()),
            message: Some("payment failed".into()),
            error_type: Some("PaymentError".into()),
            error_message: Some("declined".into()),
            stack_trace: Some("  File \"billing.py\", line 1, in charge".into()),
            attributes: Some(json!({"order_id": "ord_99", "amount": 12.5})),
            sdk_version: Some("1.0.0".into()),
            platform: Some("python".into()),
            platform_version: Some("3.12".into()),
            error_fingerprint: Some("abc123".into()),
            enqueued_at: "2025-11-14T10:00:01Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_roundtrip_preserves_event() {
        let event = sample();
        let decoded = decode(&encode(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_roundtrip_with_sparse_fields() {
        let mut event = sample();
        event.environment = None;
        event.attributes = None;
        event.error_fingerprint = None;
        let decoded = decode(&encode(&event).unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not msgpack at all").is_err());
        assert!(decode(&[]).is_err());
    }
}
