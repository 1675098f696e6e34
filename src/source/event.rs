use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log line, ordered `Fatal > Error > Warn > Info > Debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// All levels, most severe first (report order).
    pub const ALL: [Level; 5] = [
        Level::Fatal,
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
    ];

    /// ERROR, WARN and FATAL form the error class.
    pub fn is_error_class(self) -> bool {
        matches!(self, Level::Fatal | Level::Error | Level::Warn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for Level {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FATAL" => Ok(Level::Fatal),
            "ERROR" => Ok(Level::Error),
            "WARN" => Ok(Level::Warn),
            "INFO" => Ok(Level::Info),
            "DEBUG" => Ok(Level::Debug),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

/// A parsed log line. `timestamp` is epoch seconds as written by the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: f64,
    pub entity: String,
    pub level: Level,
}

impl LogEvent {
    pub fn new(timestamp: f64, entity: impl Into<String>, level: Level) -> Self {
        Self {
            timestamp,
            entity: entity.into(),
            level,
        }
    }
}
