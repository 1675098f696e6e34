use crate::aggregate::{EventFilter, FocusQuery, RollingAggregator, RollingOptions};
use crate::cli::report::{render_dashboard, render_follow_summary, DASHBOARD_ENTITIES};
use crate::cli::{cancel_on_ctrl_c, CommandError};
use crate::config::parse::validate_config;
use crate::config::{parse_interval, parse_refresh, Config, ConfigError};
use crate::ingest::{FollowEngine, FollowOptions};
use crate::source::LaunchLogParser;
use clap::Args;
use crossterm::{cursor, execute, queue, terminal};
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const MIN_REFRESH: Duration = Duration::from_millis(100);

#[derive(Args, Debug, Default, Clone)]
pub struct FollowArgs {
    /// Log file to follow
    pub file: PathBuf,

    /// Lines before the end of the file to start from (0 = end of file)
    #[arg(long)]
    pub tail: Option<u64>,

    /// Sliding window in log time, e.g. 5m, 90s
    #[arg(short, long, value_parser = parse_interval)]
    pub window: Option<u64>,

    /// Dashboard redraw period in seconds, e.g. 2 or 0.5
    #[arg(long, value_parser = parse_refresh)]
    pub refresh: Option<Duration>,

    /// Bucket width for the window volume chart (default: follow.interval)
    #[arg(short, long, value_parser = parse_interval)]
    pub interval: Option<u64>,

    /// Only count entities whose name contains this text
    #[arg(long)]
    pub entity: Option<String>,

    /// Only count ERROR, WARN and FATAL lines
    #[arg(short, long)]
    pub errors_only: bool,

    /// Track entities containing this text in a separate panel
    #[arg(long)]
    pub focus: Option<String>,

    /// Number of active entities shown
    #[arg(long)]
    pub top: Option<usize>,
}

/// Settings for one live session, after flags are applied.
#[derive(Debug, Clone)]
pub struct FollowPlan {
    pub engine: FollowOptions,
    pub rolling: RollingOptions,
    pub refresh: Duration,
    pub top: usize,
}

pub fn resolve(args: &FollowArgs, config: &Config) -> Result<FollowPlan, ConfigError> {
    let mut merged = config.clone();
    let follow = &mut merged.follow;
    if let Some(tail) = args.tail {
        follow.tail = tail;
    }
    if let Some(window) = args.window {
        follow.window = Duration::from_secs(window);
    }
    if let Some(refresh) = args.refresh {
        follow.refresh = refresh;
    }
    if let Some(interval) = args.interval {
        follow.interval = interval;
    }
    validate_config(&merged)?;

    let follow = merged.follow;
    Ok(FollowPlan {
        engine: FollowOptions {
            tail_lines: follow.tail,
            partial_line_backoff: follow.partial_line_backoff,
            eof_backoff: follow.eof_backoff,
            check_interval: follow.check_interval,
            scan_cap: merged.analysis.boundary_scan_cap,
        },
        rolling: RollingOptions {
            interval_sec: follow.interval,
            window_sec: follow.window.as_secs_f64(),
            filter: EventFilter {
                from: None,
                to: None,
                entity: args.entity.clone().filter(|e| !e.is_empty()),
                errors_only: args.errors_only,
            },
            focus: args.focus.clone().and_then(FocusQuery::new),
            alert_capacity: follow.alert_capacity,
            rate_window_secs: follow.rate_window_secs,
        },
        refresh: follow.refresh.max(MIN_REFRESH),
        top: args.top.unwrap_or(DASHBOARD_ENTITIES),
    })
}

/// Hides the cursor while the dashboard owns the screen.
struct TerminalGuard {
    stdout: Stdout,
}

impl TerminalGuard {
    fn new() -> io::Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, cursor::Hide, terminal::Clear(terminal::ClearType::All))?;
        Ok(Self { stdout })
    }

    fn draw(&mut self, frame: &str) -> io::Result<()> {
        queue!(
            self.stdout,
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::All)
        )?;
        self.stdout.write_all(frame.as_bytes())?;
        self.stdout.flush()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, cursor::Show);
    }
}

async fn render_loop(
    sink: Arc<Mutex<RollingAggregator>>,
    mut guard: TerminalGuard,
    plan_refresh: Duration,
    top: usize,
    started: Instant,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(plan_refresh);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(top);
        let (width, rows) = terminal::size().unwrap_or((100, 40));
        let frame = render_dashboard(&snapshot, started.elapsed(), width as usize, rows as usize);
        if let Err(e) = guard.draw(&frame) {
            tracing::warn!(error = %e, "Dashboard redraw failed");
            break;
        }
    }
}

pub async fn run(args: FollowArgs, config: Config) -> Result<(), CommandError> {
    let plan = resolve(&args, &config)?;
    if !args.file.exists() {
        tracing::info!(path = %args.file.display(), "Waiting for log file to appear");
    }

    let sink = Arc::new(Mutex::new(RollingAggregator::new(plan.rolling.clone())));
    let cancel = CancellationToken::new();
    let engine = FollowEngine::new(
        args.file.clone(),
        Box::new(LaunchLogParser::new()?),
        Arc::clone(&sink),
        plan.engine.clone(),
        cancel.clone(),
    );

    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let started = Instant::now();

    let renderer = if console::Term::stdout().is_term() {
        let guard = TerminalGuard::new()?;
        Some(tokio::spawn(render_loop(
            Arc::clone(&sink),
            guard,
            plan.refresh,
            plan.top,
            started,
            cancel.clone(),
        )))
    } else {
        None
    };

    let result = engine.run().await;

    // Stops the renderer too when the engine failed on its own
    cancel.cancel();
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }
    ctrl_c.abort();

    let summary = result?;
    let aggregator = sink.lock().unwrap_or_else(PoisonError::into_inner);
    println!(
        "{}",
        render_follow_summary(
            &summary,
            aggregator.counts(),
            &aggregator.level_totals(),
            started.elapsed()
        )
    );
    Ok(())
}
