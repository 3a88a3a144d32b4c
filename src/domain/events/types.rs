//! Log event model
//!
//! Events are immutable once ingested. Enum fields are strict; everything a
//! client can inflate (message, stack trace, attribute blob) carries a hard
//! size ceiling and oversize input is rejected, never truncated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Field size ceilings (bytes of the serialized value)
pub const MAX_MESSAGE_LEN: usize = 10_000;
pub const MAX_ERROR_TYPE_LEN: usize = 255;
pub const MAX_ERROR_MESSAGE_LEN: usize = 5_000;
pub const MAX_STACK_TRACE_LEN: usize = 50_000;
pub const MAX_ATTRIBUTES_BYTES: usize = 100_000;
pub const MAX_ENVIRONMENT_LEN: usize = 20;
pub const MAX_RELEASE_LEN: usize = 100;
pub const MAX_SDK_VERSION_LEN: usize = 20;
pub const MAX_PLATFORM_LEN: usize = 50;

/// Client timestamps may run slightly ahead of server clocks
pub const TIMESTAMP_FUTURE_TOLERANCE_MINUTES: i64 = 5;

#[derive(Debug, Error)]
#[error("invalid {field}: '{value}'")]
pub struct InvalidEnumValue {
    pub field: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(InvalidEnumValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(LogLevel, "level", {
    Debug => "debug",
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

string_enum!(LogType, "log_type", {
    Console => "console",
    Logger => "logger",
    Exception => "exception",
    Network => "network",
    Database => "database",
    Endpoint => "endpoint",
    Custom => "custom",
});

string_enum!(Importance, "importance", {
    Low => "low",
    Standard => "standard",
    High => "high",
    Critical => "critical",
});

impl LogLevel {
    /// Levels that feed the real-time notification channel
    pub fn is_alert(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

/// A validated client event, before enrichment
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub log_type: LogType,
    pub importance: Importance,
    pub message: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub attributes: Option<serde_json::Value>,
    pub sdk_version: Option<String>,
    pub platform: Option<String>,
    pub platform_version: Option<String>,
}

/// A persisted event as read back from the logs store
#[derive(Debug, Clone, Serialize)]
pub struct StoredLogEvent {
    pub id: i64,
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
}
