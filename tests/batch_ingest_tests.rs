/// Batch ingestion tests against real files and a real checkpoint store.
///
/// Covers resume equivalence, trailing-line exclusion, the no-op and
/// rotation paths, cancellation and a file vanishing mid-scan.
use logtide::aggregate::{Aggregator, AggregatorOptions, EventSink};
use logtide::ingest::{BatchIngestionEngine, IngestError, ScanMode};
use logtide::source::{LaunchLogParser, Level, LogEvent};
use logtide::storage::CheckpointStore;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: engine with its checkpoint store under `dir`
    fn engine(dir: &Path, cancel: CancellationToken) -> BatchIngestionEngine {
        BatchIngestionEngine::new(
            Box::new(LaunchLogParser::new().unwrap()),
            CheckpointStore::new(dir.join("state")),
            cancel,
        )
    }

    /// Helper: a 25-byte launch line
    fn line(i: u64, level: &str, entity: &str) -> String {
        let pad = " ".repeat(5 - level.len());
        let text = format!("{}.0 [{}] [{}]:{}x\n", 1000 + i, level, entity, pad);
        assert_eq!(text.len(), 25, "fixture line must be 25 bytes: {text:?}");
        text
    }

    fn lines(range: std::ops::Range<u64>) -> String {
        range
            .map(|i| match i % 3 {
                0 => line(i, "INFO", "nodeA"),
                1 => line(i, "WARN", "nodeB"),
                _ => line(i, "ERROR", "nodeA"),
            })
            .collect()
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(AggregatorOptions {
            interval_sec: 60,
            ..Default::default()
        })
    }

    fn log_path(dir: &TempDir) -> PathBuf {
        dir.path().join("launch.log")
    }

    #[test]
    fn test_single_bucket_example() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(
            &path,
            "1000.0 [INFO] [nodeA]: up\n1010.0 [ERROR] [nodeA]: down\n1020.0 [WARN] [nodeA]: slow\n",
        );

        let mut agg = aggregator();
        engine(dir.path(), CancellationToken::new())
            .run(&path, false, &mut agg, &mut |_| {})
            .unwrap();

        assert_eq!(agg.buckets.len(), 1);
        let bucket = agg.buckets.values().next().unwrap();
        assert_eq!(bucket.total, 3);
        assert_eq!(bucket.levels.get(Level::Error), 1);
        assert_eq!(bucket.levels.get(Level::Warn), 1);
        assert_eq!(bucket.levels.get(Level::Info), 1);
        assert_eq!(bucket.levels.get(Level::Fatal), 0);
        assert_eq!(agg.entity_total("nodeA"), 3);
    }

    #[test]
    fn test_second_run_without_growth_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..6));
        let engine = engine(dir.path(), CancellationToken::new());

        let mut first = aggregator();
        let report = engine.run(&path, false, &mut first, &mut |_| {}).unwrap();
        assert_eq!(report.total_lines, 6);
        let saved = engine.store().load(&path).unwrap();

        let mut second = aggregator();
        let report = engine.run(&path, false, &mut second, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::NoOp);
        assert!(report.outcome.is_none());
        assert_eq!(second.counts.total, 0);
        assert_eq!(report.total_lines, 6);
        assert_eq!(engine.store().load(&path).unwrap().offset, saved.offset);
    }

    #[test]
    fn test_resume_matches_single_pass() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let engine_a = engine(dir.path(), CancellationToken::new());

        append(&path, &lines(0..10));
        let mut resumed = aggregator();
        engine_a.run(&path, false, &mut resumed, &mut |_| {}).unwrap();

        append(&path, &lines(10..25));
        let report = engine_a.run(&path, false, &mut resumed, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::Incremental { offset: 250 });
        assert_eq!(report.total_lines, 25);

        let other = TempDir::new().unwrap();
        let mut single = aggregator();
        engine(other.path(), CancellationToken::new())
            .run(&path, false, &mut single, &mut |_| {})
            .unwrap();

        assert_eq!(resumed.counts, single.counts);
        assert_eq!(resumed.level_totals, single.level_totals);
        assert_eq!(resumed.buckets, single.buckets);
        assert_eq!(resumed.entity_total("nodeA"), single.entity_total("nodeA"));
        assert_eq!(resumed.range, single.range);
    }

    #[test]
    fn test_unterminated_line_counted_once_after_completion() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        let engine = engine(dir.path(), CancellationToken::new());

        append(&path, "1000.0 [INFO] [nodeA]: one\n1001.0 [INFO] [nodeA]: two\n1002.0 [ERR");
        let mut agg = aggregator();
        let report = engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();
        let first_offset = report.outcome.unwrap().final_offset;
        assert_eq!(agg.counts.total, 2);
        assert_eq!(first_offset, 54);

        append(&path, "OR] [nodeA]: three\n");
        let report = engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::Incremental { offset: 54 });
        assert_eq!(agg.counts.total, 3);
        assert_eq!(agg.level_totals.get(Level::Error), 1);
        assert_eq!(report.total_lines, 3);

        let report = engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::NoOp);
        assert_eq!(agg.counts.total, 3);
    }

    #[test]
    fn test_matching_checkpoint_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..4));
        assert_eq!(fs::metadata(&path).unwrap().len(), 100);

        let engine = engine(dir.path(), CancellationToken::new());
        engine.store().save(&path, 100, 4, None, 100).unwrap();

        let mut agg = aggregator();
        let report = engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::NoOp);
        assert_eq!(agg.counts.total, 0);
    }

    #[test]
    fn test_shrunk_file_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..16));
        assert_eq!(fs::metadata(&path).unwrap().len(), 400);

        let engine = engine(dir.path(), CancellationToken::new());
        engine.store().save(&path, 500, 20, Some(999.0), 1000).unwrap();

        let mut agg = aggregator();
        let report = engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::Full { rotated: true });

        let outcome = report.outcome.unwrap();
        assert_eq!(outcome.safe_start, 0);
        assert_eq!(outcome.lines, 16);
        assert_eq!(report.total_lines, 16);

        let saved = engine.store().load(&path).unwrap();
        assert_eq!(saved.offset, 400);
        assert_eq!(saved.file_size, 400);
        assert_eq!(saved.last_ts, Some(1015.0));
    }

    #[test]
    fn test_full_flag_ignores_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..4));
        let engine = engine(dir.path(), CancellationToken::new());

        let mut agg = aggregator();
        engine.run(&path, false, &mut agg, &mut |_| {}).unwrap();

        let mut again = aggregator();
        let report = engine.run(&path, true, &mut again, &mut |_| {}).unwrap();
        assert_eq!(report.mode, ScanMode::Full { rotated: false });
        assert_eq!(again.counts.total, 4);
        assert_eq!(report.total_lines, 4);
    }

    #[test]
    fn test_full_rescans_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..200));
        let engine = engine(dir.path(), CancellationToken::new());

        let mut first = aggregator();
        let first_report = engine.run(&path, true, &mut first, &mut |_| {}).unwrap();
        let mut second = aggregator();
        let second_report = engine.run(&path, true, &mut second, &mut |_| {}).unwrap();

        assert_eq!(first_report.mode, ScanMode::Full { rotated: false });
        assert_eq!(second_report.mode, ScanMode::Full { rotated: false });
        assert_eq!(first_report.total_lines, 200);
        assert_eq!(second_report.total_lines, 200);

        assert_eq!(first.counts, second.counts);
        assert_eq!(first.level_totals, second.level_totals);
        assert_eq!(first.buckets, second.buckets);
        assert_eq!(first.entities, second.entities);
        assert_eq!(first.range, second.range);
        assert_eq!(second.buckets.len(), 4);
        assert_eq!(second.entity_total("nodeA") + second.entity_total("nodeB"), 200);
    }

    #[test]
    fn test_cancelled_pass_resumes_next_run() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..8));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut agg = aggregator();
        let report = engine(dir.path(), cancel)
            .run(&path, false, &mut agg, &mut |_| {})
            .unwrap();
        assert!(report.interrupted());
        assert_eq!(agg.counts.total, 0);

        let store = CheckpointStore::new(dir.path().join("state"));
        let saved = store.load(&path).unwrap();
        assert_eq!(saved.offset, 0);
        assert_eq!(saved.file_size, saved.offset);

        let report = engine(dir.path(), CancellationToken::new())
            .run(&path, false, &mut agg, &mut |_| {})
            .unwrap();
        assert_eq!(report.mode, ScanMode::Incremental { offset: 0 });
        assert_eq!(agg.counts.total, 8);
        assert_eq!(report.total_lines, 8);
    }

    /// Sink that removes the log file as soon as the first line arrives.
    struct Unlinker {
        path: PathBuf,
        seen: u64,
    }

    impl EventSink for Unlinker {
        fn record_unparsed(&mut self) {}

        fn record(&mut self, _event: &LogEvent, _raw_line: &str) {
            if self.seen == 0 {
                fs::remove_file(&self.path).unwrap();
            }
            self.seen += 1;
        }
    }

    #[test]
    fn test_vanished_file_is_reported_without_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = log_path(&dir);
        append(&path, &lines(0..4));
        let engine = engine(dir.path(), CancellationToken::new());

        let mut sink = Unlinker {
            path: path.clone(),
            seen: 0,
        };
        let result = engine.run(&path, false, &mut sink, &mut |_| {});
        assert!(matches!(result, Err(IngestError::Vanished(_))));
        assert!(engine.store().load(&path).is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let mut agg = aggregator();
        let result = engine(dir.path(), CancellationToken::new()).run(
            &dir.path().join("absent.log"),
            false,
            &mut agg,
            &mut |_| {},
        );
        assert!(result.is_err());
    }
}
