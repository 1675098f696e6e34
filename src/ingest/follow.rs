use crate::aggregate::EventSink;
use crate::source::boundary::{rewind_to_line_start, tail_start_offset, DEFAULT_SCAN_CAP};
use crate::source::parser::LineParser;
use std::fs::{self, File, Metadata};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Failures that stop a session before it starts. I/O trouble on the
/// followed file itself is retried, never returned.
#[derive(Debug, Error)]
pub enum FollowError {
    #[error("no log file path given")]
    EmptyPath,
}

#[derive(Debug, Clone)]
pub struct FollowOptions {
    /// Lines before EOF to start from. 0 starts at EOF.
    pub tail_lines: u64,
    pub partial_line_backoff: Duration,
    pub eof_backoff: Duration,
    /// How often rotation and truncation are checked while idle.
    pub check_interval: Duration,
    pub scan_cap: u64,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            tail_lines: 5000,
            partial_line_backoff: Duration::from_millis(50),
            eof_backoff: Duration::from_millis(200),
            check_interval: Duration::from_secs(1),
            scan_cap: DEFAULT_SCAN_CAP,
        }
    }
}

/// Totals for a finished follow session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowSummary {
    pub lines: u64,
    pub rotations: u64,
    pub truncations: u64,
    /// Read, open or stat failures that dropped the handle for a retry.
    pub io_errors: u64,
    /// Read position in the file open at exit.
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(metadata: &Metadata) -> Self {
        // No inode here; creation time stands in for identity
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        if let Ok(created) = metadata.created() {
            created.hash(&mut hasher);
        }
        Self {
            dev: 0,
            ino: hasher.finish(),
        }
    }
}

enum ReadStep {
    Line,
    /// The leading partial line of a mid-line start was dropped.
    Skipped,
    Wait(Duration),
}

enum FileCheck {
    Unchanged,
    Rotated,
    Truncated,
}

/// The one handle a session reads from. Replaced, never reused, on rotation.
struct OpenFile {
    reader: BufReader<File>,
    identity: FileIdentity,
    /// Position right after the last complete line read.
    pos: u64,
    /// The start position fell inside a line; drop that line once complete.
    skip_partial: bool,
}

/// Tails a growing file and feeds each complete line to a shared sink.
///
/// Lines are applied one at a time under the sink's mutex, so a renderer
/// locking the same mutex always sees state between two lines.
pub struct FollowEngine<S> {
    path: PathBuf,
    parser: Box<dyn LineParser>,
    sink: Arc<Mutex<S>>,
    options: FollowOptions,
    cancel: CancellationToken,
}

impl<S: EventSink + Send> FollowEngine<S> {
    pub fn new(
        path: impl Into<PathBuf>,
        parser: Box<dyn LineParser>,
        sink: Arc<Mutex<S>>,
        options: FollowOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            parser,
            sink,
            options,
            cancel,
        }
    }

    pub fn sink(&self) -> &Arc<Mutex<S>> {
        &self.sink
    }

    /// Follows the file until the cancellation token fires.
    ///
    /// A file that is missing or unreadable is waited for on the check
    /// cadence. When the same file becomes readable again, reading resumes
    /// where it stopped.
    pub async fn run(&self) -> Result<FollowSummary, FollowError> {
        if self.path.as_os_str().is_empty() {
            return Err(FollowError::EmptyPath);
        }

        let mut summary = FollowSummary::default();
        let mut handle: Option<OpenFile> = None;
        // Identity and position of a handle dropped after an error
        let mut resume: Option<(FileIdentity, u64)> = None;
        let mut failing = false;
        let mut last_check = Instant::now();
        let mut buf = Vec::with_capacity(512);

        tracing::info!(path = %self.path.display(), tail = self.options.tail_lines, "Following log file");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let step = match handle.as_mut() {
                Some(file) => self.read_step(file, &mut buf),
                None => {
                    match self.open(resume) {
                        Ok(opened) => {
                            if opened.is_some() {
                                resume = None;
                                failing = false;
                            }
                            handle = opened;
                        }
                        Err(e) => self.note_error(&mut summary, &mut failing, "open", &e),
                    }
                    if handle.is_none() && self.pause(self.options.check_interval).await {
                        break;
                    }
                    continue;
                }
            };

            let backoff = match step {
                Ok(ReadStep::Line) => {
                    summary.lines += 1;
                    failing = false;
                    continue;
                }
                Ok(ReadStep::Skipped) => continue,
                Ok(ReadStep::Wait(backoff)) => backoff,
                Err(e) => {
                    self.note_error(&mut summary, &mut failing, "read", &e);
                    resume = release(&mut handle);
                    if self.pause(self.options.check_interval).await {
                        break;
                    }
                    continue;
                }
            };
            if self.pause(backoff).await {
                break;
            }

            if last_check.elapsed() < self.options.check_interval {
                continue;
            }
            last_check = Instant::now();

            let Some(file) = handle.as_mut() else {
                continue;
            };
            match self.check(file) {
                Ok(FileCheck::Unchanged) => {}
                Ok(FileCheck::Rotated) => {
                    summary.rotations += 1;
                    tracing::info!(path = %self.path.display(), "Rotation detected, reopening");
                    // Close the old handle before opening the new file
                    drop(handle.take());
                    match self.open(None) {
                        Ok(opened) => handle = opened,
                        Err(e) => self.note_error(&mut summary, &mut failing, "open", &e),
                    }
                }
                Ok(FileCheck::Truncated) => {
                    summary.truncations += 1;
                    tracing::info!(path = %self.path.display(), pos = file.pos, "Truncation detected");
                    if let Err(e) = self.reseek_after_truncation(file) {
                        self.note_error(&mut summary, &mut failing, "seek", &e);
                        // The old position is meaningless after a truncation
                        drop(handle.take());
                    }
                }
                Err(e) => {
                    self.note_error(&mut summary, &mut failing, "stat", &e);
                    resume = release(&mut handle);
                }
            }
        }

        summary.offset = handle
            .map(|f| f.pos)
            .or(resume.map(|(_, pos)| pos))
            .unwrap_or(0);
        tracing::info!(
            path = %self.path.display(),
            lines = summary.lines,
            rotations = summary.rotations,
            truncations = summary.truncations,
            io_errors = summary.io_errors,
            "Follow session ended"
        );
        Ok(summary)
    }

    /// Reads at most one line. Errors leave `file.pos` at the last complete line.
    fn read_step(&self, file: &mut OpenFile, buf: &mut Vec<u8>) -> io::Result<ReadStep> {
        buf.clear();
        let n = file.reader.read_until(b'\n', buf)?;

        if n > 0 && buf.last() == Some(&b'\n') {
            file.pos += n as u64;
            if file.skip_partial {
                file.skip_partial = false;
                return Ok(ReadStep::Skipped);
            }
            self.apply(buf);
            return Ok(ReadStep::Line);
        }

        if n > 0 {
            // Writer is mid-line; re-read it whole later
            file.reader.seek(SeekFrom::Start(file.pos))?;
            Ok(ReadStep::Wait(self.options.partial_line_backoff))
        } else {
            Ok(ReadStep::Wait(self.options.eof_backoff))
        }
    }

    fn note_error(
        &self,
        summary: &mut FollowSummary,
        failing: &mut bool,
        op: &str,
        error: &io::Error,
    ) {
        summary.io_errors += 1;
        if *failing {
            tracing::debug!(path = %self.path.display(), op, error = %error, "Log file still unavailable");
        } else {
            tracing::warn!(path = %self.path.display(), op, error = %error, "Log file unavailable, retrying");
            *failing = true;
        }
    }

    fn apply(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\n', '\r']);
        let event = self.parser.parse(line);

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            Some(event) => sink.record(&event, line),
            None => sink.record_unparsed(),
        }
    }

    /// Returns true when cancelled during the pause.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = sleep(duration) => false,
        }
    }

    /// Opens the file. With `resume` naming this same file, reading continues
    /// at the saved position; otherwise it starts at the configured tail. A
    /// missing file yields `None` so the caller can wait for it to appear.
    fn open(&self, resume: Option<(FileIdentity, u64)>) -> io::Result<Option<OpenFile>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Waiting for file to appear");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let metadata = file.metadata()?;
        let identity = FileIdentity::of(&metadata);

        let (pos, skip_partial) = match resume {
            Some((previous, pos)) if previous == identity && pos <= metadata.len() => {
                file.seek(SeekFrom::Start(pos))?;
                (pos, false)
            }
            _ => self.start_position(&mut file)?,
        };

        Ok(Some(OpenFile {
            reader: BufReader::new(file),
            identity,
            pos,
            skip_partial,
        }))
    }

    /// Seeks `file` to the line-aligned start position.
    fn start_position(&self, file: &mut File) -> io::Result<(u64, bool)> {
        let start = tail_start_offset(file, self.options.tail_lines)?;
        let safe = rewind_to_line_start(file, start, self.options.scan_cap)?;
        file.seek(SeekFrom::Start(safe))?;
        Ok((safe, safe < start))
    }

    fn reseek_after_truncation(&self, file: &mut OpenFile) -> io::Result<()> {
        let (pos, skip_partial) = if self.options.tail_lines > 0 {
            self.start_position(file.reader.get_mut())?
        } else {
            (0, false)
        };
        // Seeking the BufReader also discards its buffer
        file.reader.seek(SeekFrom::Start(pos))?;
        file.pos = pos;
        file.skip_partial = skip_partial;
        Ok(())
    }

    fn check(&self, file: &OpenFile) -> io::Result<FileCheck> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            // Mid-rotation: the new file has not been created yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileCheck::Unchanged),
            Err(e) => return Err(e),
        };

        if FileIdentity::of(&metadata) != file.identity {
            Ok(FileCheck::Rotated)
        } else if metadata.len() < file.pos {
            Ok(FileCheck::Truncated)
        } else {
            Ok(FileCheck::Unchanged)
        }
    }
}

/// Drops the handle, keeping what is needed to resume the same file.
fn release(handle: &mut Option<OpenFile>) -> Option<(FileIdentity, u64)> {
    handle.take().map(|file| (file.identity, file.pos))
}
