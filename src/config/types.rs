use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub checkpoint: CheckpointConfig,
    pub analysis: AnalysisConfig,
    pub follow: FollowConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Directory holding `.checkpoint.json`.
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("logtide"))
        .unwrap_or_else(|| PathBuf::from(".logtide"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Bucket width in seconds.
    #[serde(with = "interval_format")]
    pub interval: u64,
    pub top_entities: usize,
    pub errors_only: bool,
    pub entity: Option<String>,
    pub focus: Option<String>,
    /// Lower time bound, in any format `parse_datetime_arg` accepts.
    pub from: Option<String>,
    pub to: Option<String>,
    pub sample_capacity: usize,
    pub focus_sample_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub gap_threshold: Duration,
    pub gap_capacity: usize,
    pub spike_factor: f64,
    pub boundary_scan_cap: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: 3600,
            top_entities: 10,
            errors_only: false,
            entity: None,
            focus: None,
            from: None,
            to: None,
            sample_capacity: 500,
            focus_sample_capacity: 200,
            gap_threshold: Duration::from_secs(10),
            gap_capacity: 50,
            spike_factor: 2.0,
            boundary_scan_cap: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FollowConfig {
    /// Lines before EOF to start from; 0 starts at EOF.
    pub tail: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh: Duration,
    /// Bucket width of the window volume chart, in seconds.
    #[serde(with = "interval_format")]
    pub interval: u64,
    pub alert_capacity: usize,
    pub rate_window_secs: u64,
    #[serde(with = "humantime_serde")]
    pub partial_line_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub eof_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            tail: 5000,
            window: Duration::from_secs(300),
            refresh: Duration::from_secs(2),
            interval: 60,
            alert_capacity: 20,
            rate_window_secs: 10,
            partial_line_backoff: Duration::from_millis(50),
            eof_backoff: Duration::from_millis(200),
            check_interval: Duration::from_secs(1),
        }
    }
}

// Intervals accept `<int>[h|m|s]` strings or a bare integer meaning hours
mod interval_format {
    use crate::config::parse::{format_interval, parse_interval};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Hours(u64),
        Text(String),
    }

    pub fn serialize<S>(secs: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_interval(*secs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match Raw::deserialize(deserializer)? {
            Raw::Hours(h) => h.to_string(),
            Raw::Text(s) => s,
        };
        parse_interval(&text).map_err(serde::de::Error::custom)
    }
}
