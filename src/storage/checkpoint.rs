use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u64 = 2;
const STORE_FILE_NAME: &str = ".checkpoint.json";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize checkpoint store: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Resume point for one log file.
///
/// `offset` and `file_size` are required non-negative integers. Fields this
/// version does not know about land in `extra` and are written back on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Byte position right after the last fully processed line.
    pub offset: u64,
    #[serde(default)]
    pub total_lines: u64,
    #[serde(default)]
    pub last_ts: Option<f64>,
    /// File size observed when the checkpoint was written.
    pub file_size: u64,
    #[serde(default)]
    pub analyzed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Checkpoint {
    const FIELDS: [&'static str; 5] = [
        "offset",
        "total_lines",
        "last_ts",
        "file_size",
        "analyzed_at",
    ];

    /// Decodes one store entry. Any structural defect yields `None`.
    fn from_entry(key: &str, entry: &Value) -> Option<Self> {
        match Checkpoint::deserialize(entry) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!(path = %key, error = %e, "Ignoring malformed checkpoint entry");
                None
            }
        }
    }

    /// Unknown fields of a previous entry, to be carried into its replacement.
    fn extra_of(entry: Option<Value>) -> Map<String, Value> {
        let Some(Value::Object(mut fields)) = entry else {
            return Map::new();
        };
        for known in Self::FIELDS {
            fields.remove(known);
        }
        fields
    }
}

/// Per-file resume records, stored together in one JSON object keyed by
/// absolute log path:
///
/// ```json
/// {
///   "/var/log/robot/launch.log": {
///     "offset": 1024, "total_lines": 12, "last_ts": 1769472000.5,
///     "file_size": 1030, "analyzed_at": "2026-01-27 09:00:00"
///   },
///   "schema_version": 2,
///   "created_at": "2026-01-27 08:00:00",
///   "updated_at": "2026-01-27 09:00:00"
/// }
/// ```
///
/// Writes are read-modify-write of the whole store and replace the file
/// atomically. Unrelated entries and unknown fields are preserved. A single
/// writer at a time is assumed.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    store_path: PathBuf,
}

impl CheckpointStore {
    /// Store living in `dir/.checkpoint.json`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store_path: dir.into().join(STORE_FILE_NAME),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Loads the checkpoint for `log_path`.
    ///
    /// Missing store, malformed JSON, wrong types or negative values all
    /// yield `None`; callers fall back to a full scan.
    pub fn load(&self, log_path: &Path) -> Option<Checkpoint> {
        let data = self.read_store()?;
        let key = store_key(log_path)?;
        data.get(&key).and_then(|entry| Checkpoint::from_entry(&key, entry))
    }

    /// Merges one entry into the store and stamps `updated_at`.
    pub fn save(
        &self,
        log_path: &Path,
        offset: u64,
        total_lines: u64,
        last_ts: Option<f64>,
        file_size: u64,
    ) -> Result<()> {
        let key = store_key(log_path).ok_or_else(|| CheckpointError::Io {
            path: log_path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "cannot resolve absolute path"),
        })?;

        let mut data = self.read_store().unwrap_or_default();
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();

        data.entry("schema_version")
            .or_insert_with(|| Value::from(SCHEMA_VERSION));
        data.entry("created_at")
            .or_insert_with(|| Value::from(now.clone()));
        data.insert("updated_at".to_string(), Value::from(now.clone()));

        let checkpoint = Checkpoint {
            offset,
            total_lines,
            last_ts,
            file_size,
            analyzed_at: Some(now),
            extra: Checkpoint::extra_of(data.remove(&key)),
        };
        data.insert(key.clone(), serde_json::to_value(&checkpoint)?);

        self.write_store(&data)?;
        tracing::debug!(path = %key, offset, total_lines, file_size, "Checkpoint saved");
        Ok(())
    }

    /// Removes the entry for `log_path`. Absent entry or store is a no-op.
    pub fn clear(&self, log_path: &Path) -> Result<()> {
        let Some(mut data) = self.read_store() else {
            return Ok(());
        };
        let Some(key) = store_key(log_path) else {
            return Ok(());
        };
        if data.remove(&key).is_some() {
            self.write_store(&data)?;
            tracing::info!(path = %key, "Checkpoint cleared");
        }
        Ok(())
    }

    fn read_store(&self) -> Option<Map<String, Value>> {
        let content = match fs::read_to_string(&self.store_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.store_path.display(), error = %e, "Cannot read checkpoint store");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                tracing::warn!(path = %self.store_path.display(), "Checkpoint store is not a JSON object");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.store_path.display(), error = %e, "Checkpoint store is not valid JSON");
                None
            }
        }
    }

    /// Writes to a sibling temp file, then renames over the store.
    fn write_store(&self, data: &Map<String, Value>) -> Result<()> {
        let io_err = |source| CheckpointError::Io {
            path: self.store_path.clone(),
            source,
        };

        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(data)?;
        let temp_path = self.store_path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(io_err)?;
        fs::rename(&temp_path, &self.store_path).map_err(io_err)?;
        Ok(())
    }
}

fn store_key(log_path: &Path) -> Option<String> {
    std::path::absolute(log_path)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}
