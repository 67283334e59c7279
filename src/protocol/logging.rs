//! Log messages sent to the peer.
//!
//! Levels follow syslog severity. The peer picks a minimum with `logging/setLevel`;
//! anything below it is not sent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::jsonrpc::types::Notification;
use crate::protocol::methods::NotificationMethod;

/// Severity of a log message, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Notice => "notice",
            LoggingLevel::Warning => "warning",
            LoggingLevel::Error => "error",
            LoggingLevel::Critical => "critical",
            LoggingLevel::Alert => "alert",
            LoggingLevel::Emergency => "emergency",
        }
    }
}

impl Default for LoggingLevel {
    fn default() -> Self {
        LoggingLevel::Info
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoggingLevel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_ascii_lowercase()))
            .map_err(|_| ProtocolError::InvalidParams(format!("Invalid log level: {}", s)))
    }
}

/// Reads the level out of `logging/setLevel` params.
pub fn level_from_params(params: Option<&Value>) -> Result<LoggingLevel, ProtocolError> {
    params
        .and_then(|p| p.get("level"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidParams("level is required".to_string()))?
        .parse()
}

/// Params of `notifications/message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingMessage {
    /// Severity
    pub level: LoggingLevel,
    /// Name of the emitting logger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    /// Arbitrary payload
    pub data: Value,
}

impl LoggingMessage {
    pub fn to_notification(&self) -> Notification {
        Notification::new(NotificationMethod::Message.as_str(), serde_json::to_value(self).ok())
    }
}
