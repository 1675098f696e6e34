use crate::aggregate::EventSink;
use crate::source::boundary::{effective_scan_end, rewind_to_line_start, DEFAULT_SCAN_CAP};
use crate::source::parser::LineParser;
use crate::storage::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log file '{0}' disappeared during the scan")]
    Vanished(PathBuf),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl IngestError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| {
            if source.kind() == io::ErrorKind::NotFound {
                IngestError::Vanished(path.to_path_buf())
            } else {
                IngestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Scan from offset 0. `rotated` is set when the file shrank below the
    /// size recorded in its checkpoint.
    Full { rotated: bool },
    /// Resume from the checkpointed offset.
    Incremental { offset: u64 },
    /// No growth since the last pass; the file is not opened.
    NoOp,
}

/// Picks the scan mode for a file of `file_size` bytes.
pub fn select_mode(file_size: u64, checkpoint: Option<&Checkpoint>, full: bool) -> ScanMode {
    let Some(cp) = checkpoint else {
        return ScanMode::Full { rotated: false };
    };
    if full {
        return ScanMode::Full { rotated: false };
    }
    if file_size < cp.file_size {
        return ScanMode::Full { rotated: true };
    }
    if file_size == cp.file_size {
        return ScanMode::NoOp;
    }
    if cp.offset > file_size {
        // Offset cannot point past the data; start over
        return ScanMode::Full { rotated: false };
    }
    ScanMode::Incremental { offset: cp.offset }
}

/// Byte-based progress of a scan.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub elapsed: Duration,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 100.0;
        }
        self.bytes_done as f64 * 100.0 / self.bytes_total as f64
    }

    pub fn mb_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / (1024.0 * 1024.0) / secs
    }

    pub fn eta(&self) -> Option<Duration> {
        let secs = self.elapsed.as_secs_f64();
        if self.bytes_done == 0 || secs <= 0.0 {
            return None;
        }
        let remaining = self.bytes_total.saturating_sub(self.bytes_done) as f64;
        let per_byte = secs / self.bytes_done as f64;
        Some(Duration::from_secs_f64(remaining * per_byte))
    }
}

/// Result of reading one byte range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOutcome {
    /// Line-aligned position the read actually began at.
    pub safe_start: u64,
    /// End of the last complete line inside the file size seen at start.
    pub effective_end: u64,
    /// Position right after the last fully consumed line.
    pub final_offset: u64,
    pub lines: u64,
    pub bytes: u64,
    pub interrupted: bool,
    pub max_ts: Option<f64>,
}

/// Summary of one `run` call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub path: PathBuf,
    pub mode: ScanMode,
    pub file_size: u64,
    pub outcome: Option<ScanOutcome>,
    /// Lines consumed across all passes, including this one.
    pub total_lines: u64,
    /// Checkpoint written at the end of the pass.
    pub checkpoint: Option<Checkpoint>,
}

impl BatchReport {
    pub fn interrupted(&self) -> bool {
        self.outcome.is_some_and(|o| o.interrupted)
    }
}

/// One-shot incremental scanner.
///
/// Each pass reads the complete lines appended since the previous pass and
/// records the resume point in the checkpoint store. The pass never reads past
/// the file size observed at its start, so lines appended while it runs are
/// left for the next pass.
pub struct BatchIngestionEngine {
    parser: Box<dyn LineParser>,
    store: CheckpointStore,
    cancel: CancellationToken,
    scan_cap: u64,
}

impl BatchIngestionEngine {
    pub fn new(parser: Box<dyn LineParser>, store: CheckpointStore, cancel: CancellationToken) -> Self {
        Self {
            parser,
            store,
            cancel,
            scan_cap: DEFAULT_SCAN_CAP,
        }
    }

    pub fn with_scan_cap(mut self, scan_cap: u64) -> Self {
        self.scan_cap = scan_cap;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Runs one pass over `path`, feeding complete lines to `sink`.
    pub fn run<S: EventSink + ?Sized>(
        &self,
        path: &Path,
        full: bool,
        sink: &mut S,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<BatchReport, IngestError> {
        let file_size = fs::metadata(path).map_err(IngestError::io(path))?.len();
        let checkpoint = self.store.load(path);
        let mode = select_mode(file_size, checkpoint.as_ref(), full);

        let mut report = BatchReport {
            path: path.to_path_buf(),
            mode,
            file_size,
            outcome: None,
            total_lines: checkpoint.as_ref().map(|c| c.total_lines).unwrap_or(0),
            checkpoint: checkpoint.clone(),
        };

        let start_offset = match mode {
            ScanMode::NoOp => {
                tracing::info!(path = %path.display(), file_size, "No new data since last pass");
                return Ok(report);
            }
            ScanMode::Full { rotated } => {
                if checkpoint.is_some() {
                    if rotated {
                        tracing::warn!(
                            path = %path.display(),
                            file_size,
                            "File shrank below its checkpoint, assuming rotation"
                        );
                    }
                    self.store.clear(path)?;
                }
                0
            }
            ScanMode::Incremental { offset } => offset,
        };

        tracing::info!(path = %path.display(), ?mode, start_offset, file_size, "Starting scan");

        let mut file = File::open(path).map_err(IngestError::io(path))?;
        let outcome = self
            .scan(&mut file, start_offset, file_size, sink, progress)
            .map_err(IngestError::io(path))?;
        drop(file);

        // An unlinked file stays readable through the open handle, so check the path
        if let Err(e) = fs::metadata(path) {
            return Err(IngestError::io(path)(e));
        }

        let (previous_lines, previous_ts) = match (mode, checkpoint.as_ref()) {
            (ScanMode::Incremental { .. }, Some(cp)) => (cp.total_lines, cp.last_ts),
            _ => (0, None),
        };
        let total_lines = previous_lines + outcome.lines;
        let last_ts = outcome.max_ts.or(previous_ts);
        // An interrupted pass records only what it consumed so the remainder
        // reads as growth next time
        let saved_size = if outcome.interrupted {
            outcome.final_offset
        } else {
            file_size
        };

        self.store
            .save(path, outcome.final_offset, total_lines, last_ts, saved_size)?;

        if outcome.interrupted {
            tracing::warn!(
                path = %path.display(),
                offset = outcome.final_offset,
                lines = outcome.lines,
                "Scan interrupted, progress saved"
            );
        } else {
            tracing::info!(
                path = %path.display(),
                offset = outcome.final_offset,
                lines = outcome.lines,
                total_lines,
                "Scan complete"
            );
        }

        report.outcome = Some(outcome);
        report.total_lines = total_lines;
        report.checkpoint = self.store.load(path);
        Ok(report)
    }

    /// Reads complete lines between the line start at or before
    /// `start_offset` and the last terminator within `file_size`.
    ///
    /// When `start_offset` falls inside a line, that line belongs to an
    /// earlier pass and is skipped.
    pub fn scan<R: Read + Seek, S: EventSink + ?Sized>(
        &self,
        stream: &mut R,
        start_offset: u64,
        file_size: u64,
        sink: &mut S,
        progress: &mut dyn FnMut(&Progress),
    ) -> io::Result<ScanOutcome> {
        let safe_start = rewind_to_line_start(stream, start_offset, self.scan_cap)?;
        let effective_end = effective_scan_end(stream, file_size, self.scan_cap)?;

        let mut outcome = ScanOutcome {
            safe_start,
            effective_end,
            final_offset: start_offset.min(effective_end.max(safe_start)),
            lines: 0,
            bytes: 0,
            interrupted: false,
            max_ts: None,
        };
        if effective_end <= safe_start {
            return Ok(outcome);
        }

        stream.seek(SeekFrom::Start(safe_start))?;
        let range = effective_end - safe_start;
        let mut reader = BufReader::new(stream.take(range));
        let mut buf = Vec::with_capacity(512);
        let mut pos = safe_start;

        if safe_start < start_offset {
            let n = reader.read_until(b'\n', &mut buf)?;
            pos += n as u64;
            tracing::debug!(safe_start, start_offset, skipped = n, "Skipped partial leading line");
        }
        outcome.final_offset = pos;

        let started = Instant::now();
        let mut last_percent = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                outcome.interrupted = true;
                break;
            }

            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            pos += n as u64;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            match self.parser.parse(line) {
                Some(event) => {
                    outcome.max_ts = Some(match outcome.max_ts {
                        Some(ts) => ts.max(event.timestamp),
                        None => event.timestamp,
                    });
                    sink.record(&event, line);
                }
                None => sink.record_unparsed(),
            }

            outcome.lines += 1;
            outcome.final_offset = pos;

            let done = pos - safe_start;
            let percent = done * 100 / range;
            if percent > last_percent {
                last_percent = percent;
                progress(&Progress {
                    bytes_done: done,
                    bytes_total: range,
                    elapsed: started.elapsed(),
                });
            }
        }

        outcome.bytes = outcome.final_offset.saturating_sub(safe_start);
        Ok(outcome)
    }
}
