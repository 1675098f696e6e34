use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("invalid interval '{0}': expected a positive duration like '10m', '30s', '1h' or '2'")]
    InvalidInterval(String),

    #[error("invalid refresh '{0}': expected a positive number of seconds like '2' or '0.5'")]
    InvalidRefresh(String),

    #[error("unrecognised time '{0}': use YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS] or HH:MM[:SS]")]
    InvalidDateTime(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;
    let text = expand_env_vars(&text);

    let mut config = parse_config(&text).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;
    config.checkpoint.dir = expand_tilde(&config.checkpoint.dir);

    validate_config(&config)?;
    Ok(config)
}

/// Parses YAML text. An empty document yields the defaults.
pub fn parse_config(text: &str) -> Result<Config, ConfigError> {
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(text)?)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.analysis.interval == 0 {
        errors.push("analysis.interval must be greater than zero".to_string());
    }
    if config.follow.interval == 0 {
        errors.push("follow.interval must be greater than zero".to_string());
    }
    if config.follow.window.is_zero() {
        errors.push("follow.window must be greater than zero".to_string());
    }
    if !(config.analysis.spike_factor > 0.0) {
        errors.push(format!(
            "analysis.spike_factor must be positive, got {}",
            config.analysis.spike_factor
        ));
    }

    let from = parse_bound("analysis.from", config.analysis.from.as_deref(), &mut errors);
    let to = parse_bound("analysis.to", config.analysis.to.as_deref(), &mut errors);
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            errors.push("analysis.from must not be later than analysis.to".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn parse_bound(field: &str, value: Option<&str>, errors: &mut Vec<String>) -> Option<f64> {
    let value = value?;
    match parse_datetime_arg(value) {
        Ok(ts) => Some(ts),
        Err(e) => {
            errors.push(format!("{}: {}", field, e));
            None
        }
    }
}

/// Converts `10m`, `30s`, `1h` or a bare integer (hours) into seconds.
pub fn parse_interval(text: &str) -> Result<u64, ConfigError> {
    let s = text.trim().to_ascii_lowercase();
    let invalid = || ConfigError::InvalidInterval(text.to_string());

    let (digits, multiplier) = match s.as_bytes().last() {
        Some(b'h') => (&s[..s.len() - 1], 3600),
        Some(b'm') => (&s[..s.len() - 1], 60),
        Some(b's') => (&s[..s.len() - 1], 1),
        Some(_) => (s.as_str(), 3600),
        None => return Err(invalid()),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Parses a redraw period given in seconds, fractions allowed (`0.5`).
pub fn parse_refresh(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidRefresh(text.to_string());
    let secs: f64 = text.trim().parse().map_err(|_| invalid())?;
    if !(secs > 0.0) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// Shortest exact `<int>[h|m|s]` form of `secs`.
pub fn format_interval(secs: u64) -> String {
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// Parses a local date/time into epoch seconds.
///
/// Accepts `YYYY-MM-DD` (midnight), `YYYY-MM-DD HH:MM`, `YYYY-MM-DD HH:MM:SS`,
/// and `HH:MM` / `HH:MM:SS` meaning today.
pub fn parse_datetime_arg(text: &str) -> Result<f64, ConfigError> {
    let s = text.trim();
    let invalid = || ConfigError::InvalidDateTime(text.to_string());

    let naive = if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        dt
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        dt
    } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        date.and_time(NaiveTime::MIN)
    } else if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
    {
        Local::now().date_naive().and_time(time)
    } else {
        return Err(invalid());
    };

    // Ambiguous local times (DST fold) take the earlier instant
    let local = Local.from_local_datetime(&naive).earliest().ok_or_else(invalid)?;
    Ok(local.timestamp() as f64)
}
