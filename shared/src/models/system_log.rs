//! System Log Model (审计记录)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Persisted audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLog {
    pub timestamp: i64,
    pub level: LogLevel,
    /// Emitting component (`event_router`, `sessions`, `wallet`, ...)
    pub component: String,
    /// Event type (`entry`, `exit`, `deny`, `topup`, ...)
    pub event_type: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub tag_id: Option<String>,
    pub session_id: Option<String>,
}

impl SystemLog {
    fn new(
        level: LogLevel,
        component: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: crate::util::now_millis(),
            level,
            component: component.into(),
            event_type: event_type.into(),
            message: message.into(),
            details: None,
            tag_id: None,
            session_id: None,
        }
    }

    pub fn info(
        component: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogLevel::Info, component, event_type, message)
    }

    pub fn warning(
        component: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogLevel::Warning, component, event_type, message)
    }

    pub fn error(
        component: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(LogLevel::Error, component, event_type, message)
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn tag(mut self, tag_id: impl Into<String>) -> Self {
        self.tag_id = Some(tag_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let log = SystemLog::warning("sessions", "exit_denied", "Insufficient balance")
            .at(42)
            .tag("TAG1")
            .session("SESS_1");
        assert_eq!(log.level, LogLevel::Warning);
        assert_eq!(log.timestamp, 42);
        assert_eq!(log.tag_id.as_deref(), Some("TAG1"));
        assert_eq!(log.session_id.as_deref(), Some("SESS_1"));

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["level"], "WARNING");
    }
}
