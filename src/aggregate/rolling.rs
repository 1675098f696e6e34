//! Live-mode aggregation: a log-time sliding window plus cumulative totals.
//!
//! Window eviction happens on insertion, so the window bound holds between
//! any two lines regardless of how often a renderer looks at it.

use super::batch::EntityStats;
use super::bounded::{BoundedCollection, RingBuffer};
use super::bucket::{bucket_key, top_n, LevelCounts, TimeBucket};
use super::filter::{EventFilter, FocusQuery};
use super::{EventSink, LineCounts};
use crate::source::event::{Level, LogEvent};
use crate::source::parser::extract_message;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

const ALERT_MESSAGE_LEN: usize = 120;

#[derive(Debug, Clone)]
pub struct RollingOptions {
    /// Bucket width used when the window is re-bucketed for display.
    pub interval_sec: u64,
    pub window_sec: f64,
    pub filter: EventFilter,
    pub focus: Option<FocusQuery>,
    pub alert_capacity: usize,
    /// Number of wall-clock seconds the throughput figure averages over.
    pub rate_window_secs: u64,
}

impl Default for RollingOptions {
    fn default() -> Self {
        Self {
            interval_sec: 60,
            window_sec: 300.0,
            filter: EventFilter::default(),
            focus: None,
            alert_capacity: 20,
            rate_window_secs: 10,
        }
    }
}

/// Recent error-class line shown in the live view.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub timestamp: f64,
    pub entity: String,
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Clone)]
struct WindowEntry {
    timestamp: f64,
    entity: String,
    level: Level,
}

/// Arrival-ordered events whose timestamps are within `window_sec` of the
/// newest accepted timestamp.
#[derive(Debug, Clone, Default)]
struct Window {
    events: VecDeque<WindowEntry>,
    levels: LevelCounts,
    // false once an event arrived with a timestamp older than its predecessor
    in_order: bool,
}

impl Window {
    fn new() -> Self {
        Self {
            in_order: true,
            ..Default::default()
        }
    }

    fn push(&mut self, entry: WindowEntry) {
        if let Some(back) = self.events.back() {
            if entry.timestamp < back.timestamp {
                self.in_order = false;
            }
        }
        self.levels.incr(entry.level);
        self.events.push_back(entry);
    }

    fn evict_before(&mut self, cutoff: f64) {
        if self.in_order {
            while let Some(front) = self.events.front() {
                if front.timestamp >= cutoff {
                    break;
                }
                self.levels.decr(front.level);
                self.events.pop_front();
            }
            return;
        }

        let levels = &mut self.levels;
        self.events.retain(|e| {
            if e.timestamp < cutoff {
                levels.decr(e.level);
                false
            } else {
                true
            }
        });
        self.in_order = self
            .events
            .iter()
            .zip(self.events.iter().skip(1))
            .all(|(a, b)| a.timestamp <= b.timestamp);
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn buckets(&self, interval_sec: u64) -> Vec<TimeBucket> {
        let mut buckets: BTreeMap<i64, TimeBucket> = BTreeMap::new();
        for e in &self.events {
            let key = bucket_key(e.timestamp, interval_sec);
            buckets
                .entry(key)
                .or_insert_with(|| TimeBucket::new(key))
                .add(&e.entity, e.level);
        }
        buckets.into_values().collect()
    }

    fn top_entities(&self, n: usize) -> Vec<(String, u64)> {
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for e in &self.events {
            *counts.entry(e.entity.as_str()).or_insert(0) += 1;
        }
        top_n(counts.into_iter(), n)
            .into_iter()
            .map(|(entity, count)| (entity.to_string(), count))
            .collect()
    }
}

/// Lines per wall-clock second over the most recent seconds.
#[derive(Debug, Clone)]
struct RateWindow {
    seconds: VecDeque<(u64, u64)>,
    span: u64,
}

impl RateWindow {
    fn new(span: u64) -> Self {
        Self {
            seconds: VecDeque::new(),
            span: span.max(1),
        }
    }

    fn record(&mut self, now_sec: u64) {
        match self.seconds.back_mut() {
            Some((sec, count)) if *sec == now_sec => *count += 1,
            _ => self.seconds.push_back((now_sec, 1)),
        }
        self.expire(now_sec);
    }

    fn expire(&mut self, now_sec: u64) {
        let cutoff = now_sec.saturating_sub(self.span);
        while let Some((sec, _)) = self.seconds.front() {
            if *sec >= cutoff {
                break;
            }
            self.seconds.pop_front();
        }
    }

    fn rate(&self, now_sec: u64) -> f64 {
        let cutoff = now_sec.saturating_sub(self.span);
        let live = self.seconds.iter().filter(|(sec, _)| *sec >= cutoff);
        let (mut first, mut last, mut total) = (None, 0, 0u64);
        for (sec, count) in live {
            first.get_or_insert(*sec);
            last = *sec;
            total += count;
        }
        match first {
            Some(first) => total as f64 / (last - first + 1) as f64,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct FocusWindow {
    query: FocusQuery,
    window: Window,
    total: u64,
    levels: LevelCounts,
    alerts: RingBuffer<Alert>,
}

/// Read-only view of the aggregator taken between two lines.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub latest_ts: Option<f64>,
    pub window_sec: f64,
    pub interval_sec: u64,
    pub counts: LineCounts,
    pub rate: f64,
    pub window_total: usize,
    pub window_levels: LevelCounts,
    pub window_buckets: Vec<TimeBucket>,
    pub window_entities: Vec<(String, u64)>,
    pub level_totals: LevelCounts,
    pub alerts: Vec<Alert>,
    pub focus: Option<FocusSnapshot>,
}

#[derive(Debug, Clone)]
pub struct FocusSnapshot {
    pub query: String,
    pub window_total: usize,
    pub window_levels: LevelCounts,
    pub total: u64,
    pub levels: LevelCounts,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone)]
pub struct RollingAggregator {
    interval_sec: u64,
    window_sec: f64,
    filter: EventFilter,

    window: Window,
    rate: RateWindow,
    latest_ts: Option<f64>,
    first_ts: Option<f64>,

    counts: LineCounts,
    level_totals: LevelCounts,
    entities: HashMap<String, EntityStats>,
    alerts: RingBuffer<Alert>,
    focus: Option<FocusWindow>,
}

impl RollingAggregator {
    pub fn new(options: RollingOptions) -> Self {
        let alert_capacity = options.alert_capacity;
        Self {
            interval_sec: options.interval_sec.max(1),
            window_sec: options.window_sec,
            filter: options.filter,
            window: Window::new(),
            rate: RateWindow::new(options.rate_window_secs),
            latest_ts: None,
            first_ts: None,
            counts: LineCounts::default(),
            level_totals: LevelCounts::default(),
            entities: HashMap::new(),
            alerts: BoundedCollection::new(alert_capacity),
            focus: options.focus.map(|query| FocusWindow {
                query,
                window: Window::new(),
                total: 0,
                levels: LevelCounts::default(),
                alerts: BoundedCollection::new(alert_capacity),
            }),
        }
    }

    /// Applies one parsed line, using `wall_sec` as the current wall-clock
    /// second for the throughput counters.
    pub fn record_at(&mut self, event: &LogEvent, raw_line: &str, wall_sec: u64) {
        self.counts.total += 1;
        self.counts.parsed += 1;
        self.first_ts.get_or_insert(event.timestamp);

        if !self.filter.accepts(event) {
            return;
        }
        self.counts.matched += 1;

        let advanced = match self.latest_ts {
            Some(latest) if event.timestamp <= latest => false,
            _ => {
                self.latest_ts = Some(event.timestamp);
                true
            }
        };
        let cutoff = self.latest_ts.unwrap_or(event.timestamp) - self.window_sec;

        let is_focus = self
            .focus
            .as_ref()
            .is_some_and(|f| f.query.matches(&event.entity));

        // A late line already outside the window only counts cumulatively
        if event.timestamp >= cutoff {
            self.window.push(WindowEntry {
                timestamp: event.timestamp,
                entity: event.entity.clone(),
                level: event.level,
            });
        }
        if advanced {
            self.window.evict_before(cutoff);
        }

        if let Some(focus) = self.focus.as_mut() {
            if is_focus {
                focus.total += 1;
                focus.levels.incr(event.level);
                if event.timestamp >= cutoff {
                    focus.window.push(WindowEntry {
                        timestamp: event.timestamp,
                        entity: event.entity.clone(),
                        level: event.level,
                    });
                }
            }
            if advanced {
                focus.window.evict_before(cutoff);
            }
        }

        self.level_totals.incr(event.level);
        let stats = self.entities.entry(event.entity.clone()).or_default();
        stats.total += 1;
        stats.levels.incr(event.level);

        self.rate.record(wall_sec);

        if event.level.is_error_class() {
            let alert = Alert {
                timestamp: event.timestamp,
                entity: event.entity.clone(),
                level: event.level,
                message: extract_message(raw_line, &event.entity, ALERT_MESSAGE_LEN),
            };
            if is_focus {
                if let Some(focus) = self.focus.as_mut() {
                    focus.alerts.push(alert.clone());
                }
            }
            self.alerts.push(alert);
        }
    }

    pub fn counts(&self) -> LineCounts {
        self.counts
    }

    pub fn latest_ts(&self) -> Option<f64> {
        self.latest_ts
    }

    pub fn first_ts(&self) -> Option<f64> {
        self.first_ts
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn window_levels(&self) -> LevelCounts {
        self.window.levels
    }

    /// Oldest timestamp currently held by the window.
    pub fn window_oldest(&self) -> Option<f64> {
        self.window
            .events
            .iter()
            .map(|e| e.timestamp)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn level_totals(&self) -> LevelCounts {
        self.level_totals
    }

    pub fn entity_total(&self, entity: &str) -> u64 {
        self.entities.get(entity).map(|s| s.total).unwrap_or(0)
    }

    /// Most active entities since the session started.
    pub fn top_entities(&self, n: usize) -> Vec<(&str, u64)> {
        top_n(self.entities.iter().map(|(k, v)| (k.as_str(), v.total)), n)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn focus_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.focus.iter().flat_map(|f| f.alerts.iter())
    }

    pub fn rate_at(&self, wall_sec: u64) -> f64 {
        self.rate.rate(wall_sec)
    }

    /// Re-buckets the current window by `interval_sec`, oldest bucket first.
    pub fn window_buckets(&self, interval_sec: u64) -> Vec<TimeBucket> {
        self.window.buckets(interval_sec.max(1))
    }

    pub fn snapshot_at(&self, wall_sec: u64, top_entities: usize) -> Snapshot {
        Snapshot {
            latest_ts: self.latest_ts,
            window_sec: self.window_sec,
            interval_sec: self.interval_sec,
            counts: self.counts,
            rate: self.rate.rate(wall_sec),
            window_total: self.window.len(),
            window_levels: self.window.levels,
            window_buckets: self.window.buckets(self.interval_sec),
            window_entities: self.window.top_entities(top_entities),
            level_totals: self.level_totals,
            alerts: self.alerts.to_vec(),
            focus: self.focus.as_ref().map(|f| FocusSnapshot {
                query: f.query.as_str().to_string(),
                window_total: f.window.len(),
                window_levels: f.window.levels,
                total: f.total,
                levels: f.levels,
                alerts: f.alerts.to_vec(),
            }),
        }
    }

    pub fn snapshot(&self, top_entities: usize) -> Snapshot {
        self.snapshot_at(wall_clock_sec(), top_entities)
    }
}

impl EventSink for RollingAggregator {
    fn record_unparsed(&mut self) {
        self.counts.total += 1;
        self.counts.unparsed += 1;
    }

    fn record(&mut self, event: &LogEvent, raw_line: &str) {
        self.record_at(event, raw_line, wall_clock_sec());
    }
}

fn wall_clock_sec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
