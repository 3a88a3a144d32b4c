//! Real-time error notifications
//!
//! Compact messages published to the per-project channel
//! `notifications:errors:{project_id}` when an alert-worthy event is
//! ingested, and fanned out to SSE subscribers. Fire-and-forget end to end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::types::{LogLevel, LogType};
use super::events::QueuedEvent;

/// Per-project notification channel name
pub fn channel_name(project_id: i64) -> String {
    format!("notifications:errors:{}", project_id)
}

/// Error- and critical-level events notify, as does anything typed as an
/// exception regardless of level
pub fn should_notify(level: LogLevel, log_type: LogType) -> bool {
    level.is_alert() || log_type == LogType::Exception
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotification {
    pub project_id: i64,
    pub level: LogLevel,
    pub log_type: LogType,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_fingerprint: Option<String>,
}

impl ErrorNotification {
    pub fn from_queued(event: &QueuedEvent) -> Self {
        Self {
            project_id: event.project_id,
            level: event.level,
            log_type: event.log_type,
            timestamp: event.timestamp,
            message: event.message.clone(),
            error_type: event.error_type.clone(),
            error_message: event.error_message.clone(),
            error_fingerprint: event.error_fingerprint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_project_scoped() {
        assert_eq!(channel_name(42), "notifications:errors:42");
    }

    #[test]
    fn test_should_notify_rules() {
        assert!(should_notify(LogLevel::Error, LogType::Logger));
        assert!(should_notify(LogLevel::Critical, LogType::Console));
        assert!(should_notify(LogLevel::Warning, LogType::Exception));
        assert!(!should_notify(LogLevel::Info, LogType::Logger));
        assert!(!should_notify(LogLevel::Debug, LogType::Network));
    }
}
