use crate::aggregate::{Aggregator, AggregatorOptions, EventFilter, FocusQuery};
use crate::cli::report::{render_batch_report, render_progress};
use crate::cli::{cancel_on_ctrl_c, CommandError};
use crate::config::parse::validate_config;
use crate::config::{parse_datetime_arg, parse_interval, AnalysisConfig, Config, ConfigError};
use crate::ingest::{BatchIngestionEngine, Progress};
use crate::source::LaunchLogParser;
use crate::storage::CheckpointStore;
use clap::Args;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Default, Clone)]
pub struct AnalyzeArgs {
    /// Log file to analyse
    pub file: PathBuf,

    /// Bucket width, e.g. 10m, 30s, 1h (bare integer = hours)
    #[arg(short, long, value_parser = parse_interval)]
    pub interval: Option<u64>,

    /// Number of entities listed in the summary
    #[arg(long)]
    pub top: Option<usize>,

    /// Only count ERROR, WARN and FATAL lines
    #[arg(short, long)]
    pub errors_only: bool,

    /// Only count entities whose name contains this text
    #[arg(long)]
    pub entity: Option<String>,

    /// Drill down into entities whose name contains this text
    #[arg(long)]
    pub focus: Option<String>,

    /// Lower time bound (YYYY-MM-DD[ HH:MM[:SS]] or HH:MM[:SS])
    #[arg(long)]
    pub from: Option<String>,

    /// Upper time bound
    #[arg(long)]
    pub to: Option<String>,

    /// Ignore the saved checkpoint and rescan from the start
    #[arg(long)]
    pub full: bool,

    /// Do not print progress to stderr
    #[arg(long)]
    pub no_progress: bool,
}

/// Applies the flags on top of the file settings and validates the result.
pub fn resolve(args: &AnalyzeArgs, config: &Config) -> Result<AnalysisConfig, ConfigError> {
    let mut analysis = config.analysis.clone();
    if let Some(interval) = args.interval {
        analysis.interval = interval;
    }
    if let Some(top) = args.top {
        analysis.top_entities = top;
    }
    analysis.errors_only |= args.errors_only;
    if args.entity.is_some() {
        analysis.entity = args.entity.clone();
    }
    if args.focus.is_some() {
        analysis.focus = args.focus.clone();
    }
    if args.from.is_some() {
        analysis.from = args.from.clone();
    }
    if args.to.is_some() {
        analysis.to = args.to.clone();
    }

    let merged = Config {
        analysis,
        ..config.clone()
    };
    validate_config(&merged)?;
    Ok(merged.analysis)
}

pub fn aggregator_options(analysis: &AnalysisConfig) -> Result<AggregatorOptions, ConfigError> {
    let from = analysis.from.as_deref().map(parse_datetime_arg).transpose()?;
    let to = analysis.to.as_deref().map(parse_datetime_arg).transpose()?;

    Ok(AggregatorOptions {
        interval_sec: analysis.interval,
        filter: EventFilter {
            from,
            to,
            entity: analysis.entity.clone().filter(|e| !e.is_empty()),
            errors_only: analysis.errors_only,
        },
        focus: analysis.focus.clone().and_then(FocusQuery::new),
        sample_capacity: analysis.sample_capacity,
        focus_sample_capacity: analysis.focus_sample_capacity,
        gap_threshold_sec: analysis.gap_threshold.as_secs_f64(),
        gap_capacity: analysis.gap_capacity,
    })
}

pub async fn run(args: AnalyzeArgs, config: Config) -> Result<(), CommandError> {
    if !args.file.is_file() {
        return Err(CommandError::MissingFile(args.file));
    }

    let analysis = resolve(&args, &config)?;
    let options = aggregator_options(&analysis)?;

    let cancel = CancellationToken::new();
    let engine = BatchIngestionEngine::new(
        Box::new(LaunchLogParser::new()?),
        CheckpointStore::new(config.checkpoint.dir.clone()),
        cancel.clone(),
    )
    .with_scan_cap(analysis.boundary_scan_cap);

    let ctrl_c = cancel_on_ctrl_c(cancel);
    let show_progress = !args.no_progress && console::Term::stderr().is_term();
    let path = args.file.clone();
    let full = args.full;

    let result = tokio::task::spawn_blocking(move || {
        let mut aggregator = Aggregator::new(options);
        let mut printed = false;
        let mut on_progress = |progress: &Progress| {
            if show_progress {
                eprint!("{}", render_progress(progress));
                printed = true;
            }
        };
        let report = engine.run(&path, full, &mut aggregator, &mut on_progress);
        if printed {
            eprintln!();
        }
        report.map(|report| (report, aggregator))
    })
    .await;
    ctrl_c.abort();

    let (report, aggregator) = result??;
    if report.interrupted() {
        tracing::warn!(
            path = %report.path.display(),
            "Scan interrupted; progress saved, rerun to continue"
        );
    }

    println!(
        "{}",
        render_batch_report(&report, &aggregator, analysis.top_entities, analysis.spike_factor)
    );
    Ok(())
}
