//! Event validation
//!
//! A pure function from an untrusted JSON value to a validated `LogEvent`.
//! Each event in a batch is validated independently so batches can partially
//! succeed; the returned error is what the client sees in `errors[]`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;

use super::types::*;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("event must be a JSON object")]
    NotAnObject,

    #[error("field '{0}' is required")]
    MissingField(&'static str),

    #[error("field '{0}' must be a string")]
    NotAString(&'static str),

    #[error("invalid timestamp '{0}': expected ISO 8601")]
    InvalidTimestamp(String),

    #[error("timestamp cannot be more than {0} minutes in the future")]
    TimestampTooFarAhead(i64),

    #[error("invalid {field}: '{value}'")]
    InvalidEnum { field: &'static str, value: String },

    #[error("field '{field}' exceeds {max} bytes")]
    TooLong { field: &'static str, max: usize },

    #[error("attributes must be a JSON object")]
    AttributesNotAnObject,

    #[error("attributes exceed {max} bytes (got {size})")]
    AttributesTooLarge { size: usize, max: usize },

    #[error("field '{0}' is required when log_type is 'exception'")]
    ExceptionFieldRequired(&'static str),

    #[error("attributes.endpoint.{0} is required when log_type is 'endpoint'")]
    EndpointFieldRequired(&'static str),
}

/// Validate one raw event against the schema
pub fn validate_event(raw: &serde_json::Value) -> Result<LogEvent, ValidationError> {
    validate_event_at(raw, Utc::now())
}

/// Validation with an injected clock (the future-timestamp check)
pub fn validate_event_at(
    raw: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<LogEvent, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let timestamp_text = required_str(obj, "timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp(timestamp_text.clone()))?;

    if timestamp > now + ChronoDuration::minutes(TIMESTAMP_FUTURE_TOLERANCE_MINUTES) {
        return Err(ValidationError::TimestampTooFarAhead(
            TIMESTAMP_FUTURE_TOLERANCE_MINUTES,
        ));
    }

    let level = parse_enum::<LogLevel>(&required_str(obj, "level")?, "level")?;
    let log_type = match optional_str(obj, "log_type")? {
        Some(text) => parse_enum::<LogType>(&text, "log_type")?,
        None => LogType::Logger,
    };
    let importance = match optional_str(obj, "importance")? {
        Some(text) => parse_enum::<Importance>(&text, "importance")?,
        None => Importance::Standard,
    };

    let message = bounded(obj, "message", MAX_MESSAGE_LEN)?;
    let error_type = bounded(obj, "error_type", MAX_ERROR_TYPE_LEN)?;
    let error_message = bounded(obj, "error_message", MAX_ERROR_MESSAGE_LEN)?;
    let stack_trace = bounded(obj, "stack_trace", MAX_STACK_TRACE_LEN)?;
    let environment = bounded(obj, "environment", MAX_ENVIRONMENT_LEN)?;
    let release = bounded(obj, "release", MAX_RELEASE_LEN)?;
    let sdk_version = bounded(obj, "sdk_version", MAX_SDK_VERSION_LEN)?;
    let platform = bounded(obj, "platform", MAX_PLATFORM_LEN)?;
    let platform_version = bounded(obj, "platform_version", MAX_PLATFORM_LEN)?;

    let attributes = match obj.get("attributes") {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => {
            if !value.is_object() {
                return Err(ValidationError::AttributesNotAnObject);
            }
            let size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
            if size > MAX_ATTRIBUTES_BYTES {
                return Err(ValidationError::AttributesTooLarge {
                    size,
                    max: MAX_ATTRIBUTES_BYTES,
                });
            }
            Some(value.clone())
        }
    };

    if log_type == LogType::Exception {
        if error_type.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::ExceptionFieldRequired("error_type"));
        }
        if error_message.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::ExceptionFieldRequired("error_message"));
        }
    }

    if log_type == LogType::Endpoint {
        let endpoint = attributes
            .as_ref()
            .and_then(|a| a.get("endpoint"))
            .and_then(|e| e.as_object())
            .ok_or(ValidationError::EndpointFieldRequired("method"))?;
        for field in ["method", "path", "status_code", "duration_ms"] {
            if !endpoint.contains_key(field) {
                return Err(ValidationError::EndpointFieldRequired(match field {
                    "method" => "method",
                    "path" => "path",
                    "status_code" => "status_code",
                    _ => "duration_ms",
                }));
            }
        }
    }

    Ok(LogEvent {
        timestamp,
        level,
        log_type,
        importance,
        message,
        error_type,
        error_message,
        stack_trace,
        environment,
        release,
        attributes,
        sdk_version,
        platform,
        platform_version,
    })
}

fn required_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Err(ValidationError::MissingField(field)),
        Some(value) => value
            .as_str()
            .map(|s| s.to_string())
            .ok_or(ValidationError::NotAString(field)),
    }
}

fn optional_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(ValidationError::NotAString(field)),
    }
}

fn bounded(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &'static str,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    let value = optional_str(obj, field)?;
    if let Some(ref text) = value {
        if text.len() > max {
            return Err(ValidationError::TooLong { field, max });
        }
    }
    Ok(value)
}

fn parse_enum<T: std::str::FromStr<Err = InvalidEnumValue>>(
    text: &str,
    field: &'static str,
) -> Result<T, ValidationError> {
    text.parse().map_err(|e: InvalidEnumValue| ValidationError::InvalidEnum {
        field,
        value: e.value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "info",
            "log_type": "console",
            "importance": "standard",
            "message": "hello"
        })
    }

    #[test]
    fn test_minimal_event_passes() {
        let event = validate_event(&minimal()).unwrap();
        assert_eq!(event.level, LogLevel::Info);
        assert_eq!(event.log_type, LogType::Console);
        assert_eq!(event.importance, Importance::Standard);
        assert_eq!(event.message.as_deref(), Some("hello"));
    }

    #[test]
    fn test_defaults_applied() {
        let event = validate_event(&json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "debug"
        }))
        .unwrap();
        assert_eq!(event.log_type, LogType::Logger);
        assert_eq!(event.importance, Importance::Standard);
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let err = validate_event(&json!({"level": "info"})).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("timestamp"));
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut raw = minimal();
        raw["timestamp"] = json!("last tuesday");
        assert!(matches!(
            validate_event(&raw).unwrap_err(),
            ValidationError::InvalidTimestamp(_)
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let now: DateTime<Utc> = "2025-11-14T10:00:00Z".parse().unwrap();
        let mut raw = minimal();
        raw["timestamp"] = json!("2025-11-14T10:06:00Z");
        assert!(matches!(
            validate_event_at(&raw, now).unwrap_err(),
            ValidationError::TimestampTooFarAhead(5)
        ));

        // Within the tolerance is fine
        raw["timestamp"] = json!("2025-11-14T10:04:00Z");
        assert!(validate_event_at(&raw, now).is_ok());
    }

    #[test]
    fn test_unknown_level_rejected() {
        let mut raw = minimal();
        raw["level"] = json!("fatal");
        assert!(matches!(
            validate_event(&raw).unwrap_err(),
            ValidationError::InvalidEnum { field: "level", .. }
        ));
    }

    #[test]
    fn test_oversize_message_rejected_not_truncated() {
        let mut raw = minimal();
        raw["message"] = json!("x".repeat(MAX_MESSAGE_LEN + 1));
        assert_eq!(
            validate_event(&raw).unwrap_err(),
            ValidationError::TooLong {
                field: "message",
                max: MAX_MESSAGE_LEN
            }
        );
    }

    #[test]
    fn test_oversize_attributes_rejected() {
        let mut raw = minimal();
        raw["attributes"] = json!({"blob": "y".repeat(MAX_ATTRIBUTES_BYTES)});
        assert!(matches!(
            validate_event(&raw).unwrap_err(),
            ValidationError::AttributesTooLarge { .. }
        ));
    }

    #[test]
    fn test_attributes_must_be_object() {
        let mut raw = minimal();
        raw["attributes"] = json!([1, 2, 3]);
        assert_eq!(
            validate_event(&raw).unwrap_err(),
            ValidationError::AttributesNotAnObject
        );
    }

    #[test]
    fn test_exception_requires_error_fields() {
        let raw = json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "error",
            "log_type": "exception"
        });
        assert_eq!(
            validate_event(&raw).unwrap_err(),
            ValidationError::ExceptionFieldRequired("error_type")
        );

        let raw = json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "error",
            "log_type": "exception",
            "error_type": "ValueError"
        });
        assert_eq!(
            validate_event(&raw).unwrap_err(),
            ValidationError::ExceptionFieldRequired("error_message")
        );
    }

    #[test]
    fn test_endpoint_requires_endpoint_attributes() {
        let raw = json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "info",
            "log_type": "endpoint",
            "attributes": {"endpoint": {"method": "GET", "path": "/x", "status_code": 200}}
        });
        assert_eq!(
            validate_event(&raw).unwrap_err(),
            ValidationError::EndpointFieldRequired("duration_ms")
        );

        let raw = json!({
            "timestamp": "2025-11-14T10:00:00Z",
            "level": "info",
            "log_type": "endpoint",
            "attributes": {"endpoint": {
                "method": "GET", "path": "/x", "status_code": 200, "duration_ms": 12.5
            }}
        });
        assert!(validate_event(&raw).is_ok());
    }

    #[test]
    fn test_non_object_rejected() {
        assert_eq!(
            validate_event(&json!("nope")).unwrap_err(),
            ValidationError::NotAnObject
        );
    }
}
