/// Follow-mode tests driving a real file through rotation, truncation and
/// cancellation while the engine runs.
use logtide::aggregate::{RollingAggregator, RollingOptions};
use logtide::ingest::{FollowEngine, FollowOptions, FollowSummary};
use logtide::source::{LaunchLogParser, Level};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    type Sink = Arc<Mutex<RollingAggregator>>;

    fn options(tail_lines: u64) -> FollowOptions {
        FollowOptions {
            tail_lines,
            partial_line_backoff: Duration::from_millis(5),
            eof_backoff: Duration::from_millis(5),
            check_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    /// Helper: starts an engine on `path` in the background
    fn spawn(
        path: &Path,
        tail_lines: u64,
        cancel: &CancellationToken,
    ) -> (Sink, JoinHandle<FollowSummary>) {
        let sink = Arc::new(Mutex::new(RollingAggregator::new(RollingOptions::default())));
        let engine = FollowEngine::new(
            path,
            Box::new(LaunchLogParser::new().unwrap()),
            Arc::clone(&sink),
            options(tail_lines),
            cancel.clone(),
        );
        let handle = tokio::spawn(async move { engine.run().await.unwrap() });
        (sink, handle)
    }

    /// Helper: polls until the sink has seen `expected` parsed lines
    async fn wait_for_parsed(sink: &Sink, expected: u64) {
        let waited = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if sink.lock().unwrap().counts().parsed >= expected {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {} lines, saw {}",
            expected,
            sink.lock().unwrap().counts().parsed
        );
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_follows_appended_lines_from_end() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launch.log");
        append(&path, "1.0 [INFO] [a]: old\n2.0 [INFO] [a]: old\n");

        let cancel = CancellationToken::new();
        let (sink, handle) = spawn(&path, 0, &cancel);
        tokio::time::sleep(Duration::from_millis(50)).await;

        append(&path, "3.0 [WARN] [a]: new\n4.0 [ERROR] [b]: new\n");
        wait_for_parsed(&sink, 2).await;

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.lines, 2);

        let agg = sink.lock().unwrap();
        assert_eq!(agg.first_ts(), Some(3.0));
        assert_eq!(agg.level_totals().get(Level::Error), 1);
        assert_eq!(agg.alerts().count(), 2);
    }

    #[tokio::test]
    async fn test_rotation_reopens_new_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launch.log");
        append(&path, "1.0 [INFO] [a]: one\n2.0 [INFO] [a]: two\n");

        let cancel = CancellationToken::new();
        let (sink, handle) = spawn(&path, 1000, &cancel);
        wait_for_parsed(&sink, 2).await;

        fs::rename(&path, dir.path().join("launch.log.1")).unwrap();
        append(
            &path,
            "10.0 [INFO] [b]: three\n11.0 [INFO] [b]: four\n12.0 [INFO] [b]: five\n",
        );
        wait_for_parsed(&sink, 5).await;

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.rotations, 1);
        assert_eq!(summary.lines, 5);
        assert_eq!(sink.lock().unwrap().entity_total("b"), 3);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launch.log");
        append(&path, "1.0 [INFO] [a]: a fairly long first line\n");

        let cancel = CancellationToken::new();
        let (sink, handle) = spawn(&path, 0, &cancel);
        tokio::time::sleep(Duration::from_millis(50)).await;

        append(&path, "2.0 [INFO] [a]: another fairly long line\n");
        wait_for_parsed(&sink, 1).await;

        fs::write(&path, "3.0 [INFO] [c]: x\n").unwrap();
        wait_for_parsed(&sink, 2).await;

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.truncations, 1);
        assert_eq!(summary.lines, 2);
        assert_eq!(sink.lock().unwrap().entity_total("c"), 1);
    }

    #[tokio::test]
    async fn test_truncation_with_tail_rereads_remaining_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launch.log");
        let mut content = String::new();
        for i in 1..=5 {
            content.push_str(&format!("{i}.0 [INFO] [a]: l\n"));
        }
        append(&path, &content);

        let cancel = CancellationToken::new();
        let (sink, handle) = spawn(&path, 3, &cancel);
        wait_for_parsed(&sink, 3).await;
        assert_eq!(sink.lock().unwrap().first_ts(), Some(3.0));

        fs::write(&path, "8.0 [INFO] [c]: l\n9.0 [WARN] [c]: l\n").unwrap();
        wait_for_parsed(&sink, 5).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.truncations, 1);
        assert_eq!(summary.lines, 5);
        assert_eq!(summary.offset, 36);

        let agg = sink.lock().unwrap();
        assert_eq!(agg.entity_total("a"), 3);
        assert_eq!(agg.entity_total("c"), 2);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_line_unread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("launch.log");
        append(&path, "");

        let cancel = CancellationToken::new();
        let (sink, handle) = spawn(&path, 0, &cancel);
        tokio::time::sleep(Duration::from_millis(30)).await;

        append(&path, "1.0 [INFO] [a]: done\n2.0 [ERROR] [a]: half");
        wait_for_parsed(&sink, 1).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.offset, 21);
        assert_eq!(sink.lock().unwrap().counts().total, 1);
    }
}
