use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity/category of a log record. Decides the glyph and styling used by
/// renderers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
    Action,
    Debug,
    /// Any level a peer sent that this build does not know. Only produced by
    /// deserialization; strict parsing rejects it.
    #[serde(other)]
    Unknown,
}

pub const FALLBACK_GLYPH: &str = "➡️";

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Success,
        LogLevel::Action,
        LogLevel::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
            LogLevel::Action => "action",
            LogLevel::Debug => "debug",
            LogLevel::Unknown => "unknown",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            LogLevel::Info => "ℹ️",
            LogLevel::Warning => "⚠️",
            LogLevel::Error => "❌",
            LogLevel::Success => "✅",
            LogLevel::Action => "🚀",
            LogLevel::Debug => "🔍",
            LogLevel::Unknown => FALLBACK_GLYPH,
        }
    }

    /// Parses one of the closed set of level names. Case-insensitive,
    /// surrounding whitespace ignored.
    pub fn parse_strict(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown level `{0}`. expected one of: info, warning, error, success, action, debug")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::parse_strict(s).ok_or_else(|| UnknownLogLevel(s.to_string()))
    }
}

/// Which store produced a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    #[serde(alias = "client")]
    Local,
    #[serde(alias = "server")]
    Remote,
}

impl LogOrigin {
    pub fn label(self) -> &'static str {
        match self {
            LogOrigin::Local => "CLIENT",
            LogOrigin::Remote => "SERVER",
        }
    }
}

pub type LogDetails = Map<String, Value>;

/// One discrete event surfaced to an operator. Stores hand out clones and
/// never modify a record after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(alias = "source")]
    pub origin: LogOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<LogDetails>,
}

impl LogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        origin: LogOrigin,
        details: Option<LogDetails>,
    ) -> Self {
        Self::at(Utc::now(), message, level, origin, details)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
        level: LogLevel,
        origin: LogOrigin,
        details: Option<LogDetails>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            message: message.into(),
            level,
            origin,
            details,
        }
    }

    pub fn glyph(&self) -> &'static str {
        self.level.glyph()
    }

    pub fn origin_label(&self) -> &'static str {
        self.origin.label()
    }

    pub fn is_local(&self) -> bool {
        self.origin == LogOrigin::Local
    }

    /// Total order used everywhere records are sorted: timestamp, then id.
    pub fn chronological(a: &LogRecord, b: &LogRecord) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Builds a details map from a JSON object literal; any other value yields
/// `None`.
pub fn details_from_value(value: Value) -> Option<LogDetails> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
