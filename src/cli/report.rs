//! Plain-text renderers for the batch report and the live dashboard.
//!
//! Renderers only read aggregator state and return strings; the commands
//! decide where the text goes.

use crate::aggregate::batch::{Aggregator, TimeRange};
use crate::aggregate::bucket::{bucket_label, LevelCounts, TimeBucket};
use crate::aggregate::rolling::{Alert, Snapshot};
use crate::aggregate::LineCounts;
use crate::config::parse::format_interval;
use crate::ingest::batch::{BatchReport, Progress, ScanMode};
use crate::ingest::follow::FollowSummary;
use crate::source::event::Level;
use chrono::{Local, TimeZone};
use console::{style, StyledObject};
use std::fmt::Write;
use std::time::Duration;

const TIMELINE_LABEL_WIDTH: usize = 16;
const MAX_PATTERNS: usize = 10;
const MAX_GAPS: usize = 10;
/// Entities listed on the live dashboard.
pub const DASHBOARD_ENTITIES: usize = 7;

pub fn format_ts(ts: f64) -> String {
    match Local.timestamp_opt(ts.floor() as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{ts:.3}"),
    }
}

fn format_clock(ts: f64) -> String {
    match Local.timestamp_opt(ts.floor() as i64, 0).single() {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => format!("{ts:.0}"),
    }
}

pub fn format_span(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    let (d, h, m, s) = (secs / 86400, secs % 86400 / 3600, secs % 3600 / 60, secs % 60);
    if d > 0 {
        format!("{d}d {h}h {m}m")
    } else if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

fn styled_level(level: Level, text: String) -> StyledObject<String> {
    match level {
        Level::Fatal => style(text).red().bold(),
        Level::Error => style(text).red(),
        Level::Warn => style(text).yellow(),
        Level::Info => style(text),
        Level::Debug => style(text).dim(),
    }
}

fn level_line(levels: &LevelCounts) -> String {
    let parts: Vec<String> = levels
        .iter()
        .map(|(level, count)| styled_level(level, format!("{level}: {count}")).to_string())
        .collect();
    if parts.is_empty() {
        "(none)".to_string()
    } else {
        parts.join("  |  ")
    }
}

fn error_badge(levels: &LevelCounts) -> String {
    let mut parts = Vec::new();
    if levels.errors() > 0 {
        parts.push(style(format!("E:{}", levels.errors())).red().to_string());
    }
    if levels.warnings() > 0 {
        parts.push(style(format!("W:{}", levels.warnings())).yellow().to_string());
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("[{}]", parts.join(", "))
    }
}

fn bar(value: u64, max: u64, width: usize) -> String {
    if max == 0 || width == 0 {
        return String::new();
    }
    let len = (value as f64 / max as f64 * width as f64) as usize;
    "█".repeat(len)
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "  {}", style(title).bold());
    let _ = writeln!(out, "  {}", "─".repeat(60));
}

fn timeline(out: &mut String, buckets: &[&TimeBucket], interval_sec: u64, bar_width: usize) {
    let max = buckets.iter().map(|b| b.total).max().unwrap_or(0);
    for bucket in buckets {
        let _ = writeln!(
            out,
            "  {:<width$}  {:>8}  {:<14} {}",
            bucket_label(bucket.key, interval_sec),
            bucket.total,
            error_badge(&bucket.levels),
            style(bar(bucket.total, max, bar_width)).green(),
            width = TIMELINE_LABEL_WIDTH,
        );
    }
}

fn range_line(range: Option<TimeRange>) -> String {
    match range {
        Some(r) => format!(
            "{} ~ {} ({})",
            format_ts(r.min),
            format_ts(r.max),
            format_span(r.duration())
        ),
        None => "(no events)".to_string(),
    }
}

fn counts_line(counts: &LineCounts) -> String {
    format!(
        "{} lines read, {} parsed, {} unparsed, {} matched",
        counts.total, counts.parsed, counts.unparsed, counts.matched
    )
}

/// One-line progress indicator, meant to be rewritten in place.
pub fn render_progress(progress: &Progress) -> String {
    let eta = progress
        .eta()
        .map(|d| format_span(d.as_secs_f64()))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "\r  {:5.1}%  {:6.1} MB/s  ETA {:<10}",
        progress.percent(),
        progress.mb_per_sec(),
        eta
    )
}

fn mode_line(report: &BatchReport) -> String {
    match report.mode {
        ScanMode::Full { rotated: true } => "full scan (file shrank, rotation assumed)".to_string(),
        ScanMode::Full { rotated: false } => "full scan".to_string(),
        ScanMode::Incremental { offset } => format!("incremental from byte {offset}"),
        ScanMode::NoOp => "no new data".to_string(),
    }
}

pub fn render_batch_report(
    report: &BatchReport,
    agg: &Aggregator,
    top_entities: usize,
    spike_factor: f64,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style("═".repeat(64)).cyan().bold());
    let _ = writeln!(out, "  {} {}", style("Log analysis:").cyan().bold(), report.path.display());
    let _ = writeln!(out, "{}", style("═".repeat(64)).cyan().bold());
    let _ = writeln!(out, "  Mode: {}", mode_line(report));

    let Some(outcome) = report.outcome else {
        let _ = writeln!(
            out,
            "  Nothing new since the last pass ({} bytes, {} lines analysed so far)",
            report.file_size, report.total_lines
        );
        return out;
    };

    if outcome.interrupted {
        let _ = writeln!(
            out,
            "  {}",
            style(format!(
                "Interrupted at byte {}; the rest is picked up next run",
                outcome.final_offset
            ))
            .yellow()
        );
    }
    let _ = writeln!(out, "  This pass: {}", counts_line(&agg.counts));
    let _ = writeln!(out, "  Lines analysed in total: {}", report.total_lines);
    let _ = writeln!(out, "  Time range: {}", range_line(agg.range));
    let _ = writeln!(out, "  Interval: {}", format_interval(agg.interval_sec()));

    let filter = agg.filter();
    let mut filters = Vec::new();
    if let Some(from) = filter.from {
        filters.push(format!("from {}", format_ts(from)));
    }
    if let Some(to) = filter.to {
        filters.push(format!("to {}", format_ts(to)));
    }
    if let Some(entity) = filter.entity.as_deref().filter(|e| !e.is_empty()) {
        filters.push(format!("entity ~ '{entity}'"));
    }
    if filter.errors_only {
        filters.push("errors only".to_string());
    }
    if !filters.is_empty() {
        let _ = writeln!(out, "  Filters: {}", filters.join(", "));
    }

    if agg.counts.matched == 0 {
        let _ = writeln!(out, "\n  No lines matched.");
        return out;
    }

    section(&mut out, "[Levels]");
    let _ = writeln!(out, "  {}", level_line(&agg.level_totals));

    section(&mut out, &format!("[Log volume per {}]", format_interval(agg.interval_sec())));
    let buckets: Vec<&TimeBucket> = agg.buckets.values().collect();
    timeline(&mut out, &buckets, agg.interval_sec(), 30);

    section(&mut out, &format!("[Top {top_entities} entities]"));
    let matched = agg.counts.matched.max(1) as f64;
    for (entity, count) in agg.top_entities(top_entities) {
        let badge = agg
            .entities
            .get(entity)
            .map(|s| error_badge(&s.levels))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<40} {:>8}  ({:>5.1}%)  {}",
            entity,
            count,
            count as f64 * 100.0 / matched,
            badge
        );
    }

    let spikes = agg.spikes(spike_factor);
    if !spikes.is_empty() {
        section(&mut out, &format!("[Spikes above {spike_factor}x average]"));
        for spike in spikes {
            let top = agg
                .buckets
                .get(&spike.key)
                .map(|b| {
                    b.top_entities(3)
                        .into_iter()
                        .map(|(e, c)| format!("{e}({c})"))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<width$}  {:>8}  {:>5.1}x  {}",
                bucket_label(spike.key, agg.interval_sec()),
                spike.total,
                spike.ratio,
                style(top).dim(),
                width = TIMELINE_LABEL_WIDTH,
            );
        }
    }

    let gaps = agg.gaps_by_duration();
    if !gaps.is_empty() {
        section(&mut out, "[Longest silences]");
        for gap in gaps.iter().take(MAX_GAPS) {
            let _ = writeln!(
                out,
                "  {:<40} {} -> {}  ({})",
                gap.entity,
                format_ts(gap.start),
                format_clock(gap.end),
                format_span(gap.duration())
            );
        }
    }

    let patterns = agg.error_patterns();
    if !patterns.is_empty() {
        section(
            &mut out,
            &format!("[Error patterns] from {} samples", agg.samples.len()),
        );
        for pattern in patterns.iter().take(MAX_PATTERNS) {
            let _ = writeln!(
                out,
                "  {:>6}x {} {}: {}",
                pattern.count,
                styled_level(pattern.level, format!("[{}]", pattern.level)),
                pattern.entity.as_deref().unwrap_or(""),
                pattern.example.trim_start_matches(':').trim_start()
            );
        }
    }

    if let Some(focus) = &agg.focus {
        section(&mut out, &format!("[Focus] query = '{}'", focus.query().as_str()));
        if focus.total == 0 {
            let _ = writeln!(out, "  (no matching lines)");
            return out;
        }
        let _ = writeln!(out, "  Total: {}  |  {}", focus.total, level_line(&focus.levels));
        let _ = writeln!(out, "  Range: {}", range_line(focus.range));
        let entities: Vec<String> = agg
            .focus_entities(top_entities)
            .into_iter()
            .map(|(e, c)| format!("{e}({c})"))
            .collect();
        let _ = writeln!(out, "  Entities: {}", entities.join(", "));

        let peaks = focus.peaks(spike_factor);
        if !peaks.is_empty() {
            let _ = writeln!(out, "  Peaks:");
            for peak in peaks.iter().take(5) {
                let _ = writeln!(
                    out,
                    "    {}  {} ({:.1}x)",
                    bucket_label(peak.key, agg.interval_sec()),
                    peak.total,
                    peak.ratio
                );
            }
        }

        let focus_buckets: Vec<&TimeBucket> = focus.timeline.values().collect();
        let _ = writeln!(out, "  Timeline:");
        timeline(&mut out, &focus_buckets, agg.interval_sec(), 20);

        let patterns = focus.patterns();
        if !patterns.is_empty() {
            let _ = writeln!(out, "  Error patterns:");
            for pattern in patterns.iter().take(MAX_PATTERNS) {
                let _ = writeln!(
                    out,
                    "  {:>6}x {} {}",
                    pattern.count,
                    styled_level(pattern.level, format!("[{}]", pattern.level)),
                    pattern.example
                );
            }
        }
    }

    out
}

fn alert_line(alert: &Alert, width: usize) -> String {
    let budget = width.saturating_sub(alert.entity.len() + 24).max(20);
    let mut message: String = alert.message.chars().take(budget).collect();
    if alert.message.chars().count() > budget {
        message.push('…');
    }
    format!(
        "  {} {} {} {}",
        style(format_clock(alert.timestamp)).dim(),
        styled_level(alert.level, format!("[{}]", alert.level)),
        style(&alert.entity).bold(),
        message
    )
}

/// Live dashboard for one snapshot, sized for a `width` x `rows` terminal.
pub fn render_dashboard(snap: &Snapshot, elapsed: Duration, width: usize, rows: usize) -> String {
    let w = width.clamp(60, 130);
    let mut lines: Vec<String> = Vec::new();

    lines.push(style("═".repeat(w)).cyan().bold().to_string());
    lines.push(format!(
        "  {}{}{}",
        style("Live log monitor").cyan().bold(),
        " ".repeat(w.saturating_sub(34)),
        style("Ctrl+C: quit").dim()
    ));
    lines.push(style("═".repeat(w)).cyan().bold().to_string());

    let log_time = snap.latest_ts.map(format_ts).unwrap_or_else(|| "-".to_string());
    lines.push(format!(
        "  Log time: {}  |  Window: {}  |  Elapsed: {}  |  Rate: {} lines/s",
        style(log_time).bold(),
        format_span(snap.window_sec),
        format_span(elapsed.as_secs_f64()),
        style(format!("{:.0}", snap.rate)).green()
    ));
    lines.push(String::new());

    lines.push(format!(
        "  {}  total {}",
        style("[Window]").bold(),
        snap.window_total
    ));
    lines.push(format!("  Level:  {}", level_line(&snap.window_levels)));
    lines.push(format!(
        "  Cumul.: {}  {}",
        level_line(&snap.level_totals),
        style(format!("({} parsed lines)", snap.counts.parsed)).dim()
    ));
    lines.push(String::new());

    if !snap.window_buckets.is_empty() {
        let max_bars = rows.saturating_sub(25).clamp(3, 15);
        let skip = snap.window_buckets.len().saturating_sub(max_bars);
        let recent: Vec<&TimeBucket> = snap.window_buckets.iter().skip(skip).collect();
        lines.push(format!(
            "  {}  (unit: {})",
            style("[Volume]").bold(),
            format_interval(snap.interval_sec)
        ));
        let mut out = String::new();
        timeline(&mut out, &recent, snap.interval_sec, w.saturating_sub(50));
        lines.extend(out.lines().map(str::to_string));
        lines.push(String::new());
    }

    if !snap.window_entities.is_empty() {
        lines.push(format!("  {}", style("[Active entities]").bold()));
        let max = snap.window_entities.first().map(|(_, c)| *c).unwrap_or(0);
        for (entity, count) in &snap.window_entities {
            let pct = *count as f64 * 100.0 / snap.window_total.max(1) as f64;
            lines.push(format!(
                "  {:<40} {:>8}  ({:>5.1}%)  {}",
                entity,
                count,
                pct,
                style(bar(*count, max, w.saturating_sub(70))).cyan()
            ));
        }
        lines.push(String::new());
    }

    if let Some(focus) = &snap.focus {
        lines.push(format!("  {}  query = '{}'", style("[Focus]").bold(), focus.query));
        if focus.total == 0 {
            lines.push("  (no matching lines yet)".to_string());
        } else {
            lines.push(format!(
                "  Window: {}  |  {}",
                focus.window_total,
                level_line(&focus.window_levels)
            ));
            lines.push(format!("  Cumul.: {}  |  {}", focus.total, level_line(&focus.levels)));
            let room = rows.saturating_sub(lines.len() + 3).min(8);
            let skip = focus.alerts.len().saturating_sub(room);
            for alert in focus.alerts.iter().skip(skip) {
                lines.push(alert_line(alert, w));
            }
        }
        lines.push(String::new());
    }

    if !snap.alerts.is_empty() {
        lines.push(format!("  {}", style("[Recent errors/warnings]").bold()));
        let room = rows.saturating_sub(lines.len() + 1).max(3);
        let skip = snap.alerts.len().saturating_sub(room);
        for alert in snap.alerts.iter().skip(skip) {
            lines.push(alert_line(alert, w));
        }
    }

    lines.join("\n")
}

pub fn render_follow_summary(
    summary: &FollowSummary,
    counts: LineCounts,
    levels: &LevelCounts,
    elapsed: Duration,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n  {}", style("Live monitoring ended").bold());
    let _ = writeln!(out, "  {}", counts_line(&counts));
    let _ = writeln!(out, "  Duration: {}", format_span(elapsed.as_secs_f64()));
    if summary.rotations > 0 || summary.truncations > 0 {
        let _ = writeln!(
            out,
            "  Rotations: {}  Truncations: {}",
            summary.rotations, summary.truncations
        );
    }
    if summary.io_errors > 0 {
        let _ = writeln!(out, "  Read errors retried: {}", summary.io_errors);
    }
    if levels.total() > 0 {
        let _ = writeln!(out, "  Levels:");
        for (level, count) in levels.iter() {
            let _ = writeln!(out, "    {:<6} : {:>12}", level.as_str(), count);
        }
    }
    out
}
