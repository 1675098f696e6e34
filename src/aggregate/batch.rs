use super::bounded::{BoundedCollection, Ranked, SampleBuffer, TopRanked};
use super::bucket::{bucket_key, top_n, LevelCounts, TimeBucket};
use super::filter::{EventFilter, FocusQuery};
use super::{EventSink, LineCounts};
use crate::source::event::{Level, LogEvent};
use crate::source::parser::extract_message;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

const SAMPLE_MESSAGE_LEN: usize = 200;
const FOCUS_SAMPLE_MESSAGE_LEN: usize = 220;
const PATTERN_PREFIX_LEN: usize = 120;
const FOCUS_PATTERN_PREFIX_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub interval_sec: u64,
    pub filter: EventFilter,
    pub focus: Option<FocusQuery>,
    pub sample_capacity: usize,
    pub focus_sample_capacity: usize,
    /// Silence longer than this between two events of one entity is a gap.
    pub gap_threshold_sec: f64,
    pub gap_capacity: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            interval_sec: 3600,
            filter: EventFilter::default(),
            focus: None,
            sample_capacity: 500,
            focus_sample_capacity: 200,
            gap_threshold_sec: 10.0,
            gap_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStats {
    pub total: u64,
    pub levels: LevelCounts,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub min: f64,
    pub max: f64,
}

impl TimeRange {
    fn extend(range: &mut Option<TimeRange>, ts: f64) {
        match range {
            Some(r) => {
                r.min = r.min.min(ts);
                r.max = r.max.max(ts);
            }
            None => *range = Some(TimeRange { min: ts, max: ts }),
        }
    }

    pub fn duration(&self) -> f64 {
        self.max - self.min
    }
}

/// Representative error-class line kept for pattern grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSample {
    pub timestamp: f64,
    pub entity: String,
    pub level: Level,
    pub message: String,
}

/// Silence between two consecutive accepted events of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct GapRecord {
    pub entity: String,
    pub start: f64,
    pub end: f64,
}

impl GapRecord {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl Ranked for GapRecord {
    fn rank(&self) -> f64 {
        self.duration()
    }
}

/// Error samples grouped by a number-insensitive message prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPattern {
    pub entity: Option<String>,
    pub level: Level,
    pub pattern: String,
    pub count: u64,
    pub example: String,
}

/// A bucket whose volume exceeds a multiple of the mean bucket volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spike {
    pub key: i64,
    pub total: u64,
    pub ratio: f64,
}

/// Totals for the focus subset, maintained in the same pass as the primary
/// aggregation.
#[derive(Debug, Clone)]
pub struct FocusStats {
    query: FocusQuery,
    pub total: u64,
    pub levels: LevelCounts,
    pub range: Option<TimeRange>,
    pub timeline: BTreeMap<i64, TimeBucket>,
    pub samples: SampleBuffer<ErrorSample>,
}

impl FocusStats {
    fn new(query: FocusQuery, sample_capacity: usize) -> Self {
        Self {
            query,
            total: 0,
            levels: LevelCounts::default(),
            range: None,
            timeline: BTreeMap::new(),
            samples: BoundedCollection::new(sample_capacity),
        }
    }

    pub fn query(&self) -> &FocusQuery {
        &self.query
    }

    /// Timeline buckets above `factor` x the mean, largest first.
    pub fn peaks(&self, factor: f64) -> Vec<Spike> {
        let mut peaks = spikes_of(self.timeline.values(), factor);
        peaks.sort_by(|a, b| b.total.cmp(&a.total).then(a.key.cmp(&b.key)));
        peaks
    }

    pub fn patterns(&self) -> Vec<ErrorPattern> {
        group_patterns(self.samples.iter(), FOCUS_PATTERN_PREFIX_LEN, false)
    }
}

/// Batch aggregation of accepted events into totals and time buckets.
///
/// Buckets are created on first use and never removed. Memory is bounded by
/// key cardinality (buckets, entities) and the fixed sample capacities.
#[derive(Debug, Clone)]
pub struct Aggregator {
    interval_sec: u64,
    filter: EventFilter,
    gap_threshold_sec: f64,

    pub counts: LineCounts,
    pub level_totals: LevelCounts,
    pub entities: HashMap<String, EntityStats>,
    pub buckets: BTreeMap<i64, TimeBucket>,
    pub range: Option<TimeRange>,
    pub samples: SampleBuffer<ErrorSample>,
    pub gaps: TopRanked<GapRecord>,
    pub focus: Option<FocusStats>,

    last_seen: HashMap<String, f64>,
}

impl Aggregator {
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            interval_sec: options.interval_sec.max(1),
            filter: options.filter,
            gap_threshold_sec: options.gap_threshold_sec,
            counts: LineCounts::default(),
            level_totals: LevelCounts::default(),
            entities: HashMap::new(),
            buckets: BTreeMap::new(),
            range: None,
            samples: BoundedCollection::new(options.sample_capacity),
            gaps: BoundedCollection::new(options.gap_capacity),
            focus: options
                .focus
                .map(|q| FocusStats::new(q, options.focus_sample_capacity)),
            last_seen: HashMap::new(),
        }
    }

    pub fn interval_sec(&self) -> u64 {
        self.interval_sec
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn entity_total(&self, entity: &str) -> u64 {
        self.entities.get(entity).map(|s| s.total).unwrap_or(0)
    }

    /// Most active entities overall, ties broken by name.
    pub fn top_entities(&self, n: usize) -> Vec<(&str, u64)> {
        top_n(self.entities.iter().map(|(k, v)| (k.as_str(), v.total)), n)
    }

    /// Entities matching the focus query, most active first.
    pub fn focus_entities(&self, n: usize) -> Vec<(&str, u64)> {
        let Some(focus) = &self.focus else {
            return Vec::new();
        };
        top_n(
            self.entities
                .iter()
                .filter(|(k, _)| focus.query.matches(k))
                .map(|(k, v)| (k.as_str(), v.total)),
            n,
        )
    }

    /// Buckets whose total exceeds `factor` x the mean bucket total, in time order.
    pub fn spikes(&self, factor: f64) -> Vec<Spike> {
        spikes_of(self.buckets.values(), factor)
    }

    /// Gap records, longest first.
    pub fn gaps_by_duration(&self) -> Vec<GapRecord> {
        let mut gaps = self.gaps.to_vec();
        gaps.sort_by(|a, b| b.duration().total_cmp(&a.duration()));
        gaps
    }

    pub fn error_patterns(&self) -> Vec<ErrorPattern> {
        group_patterns(self.samples.iter(), PATTERN_PREFIX_LEN, true)
    }

    fn track_gap(&mut self, event: &LogEvent) {
        let previous = match self.last_seen.get_mut(&event.entity) {
            Some(last) => Some(std::mem::replace(last, event.timestamp)),
            None => {
                self.last_seen
                    .insert(event.entity.clone(), event.timestamp);
                None
            }
        };
        if let Some(previous) = previous {
            if event.timestamp - previous > self.gap_threshold_sec {
                self.gaps.push(GapRecord {
                    entity: event.entity.clone(),
                    start: previous,
                    end: event.timestamp,
                });
            }
        }
    }

    fn record_focus(&mut self, event: &LogEvent, raw_line: &str) {
        let interval_sec = self.interval_sec;
        let Some(focus) = self.focus.as_mut() else {
            return;
        };
        if !focus.query.matches(&event.entity) {
            return;
        }

        focus.total += 1;
        focus.levels.incr(event.level);
        TimeRange::extend(&mut focus.range, event.timestamp);

        let key = bucket_key(event.timestamp, interval_sec);
        focus
            .timeline
            .entry(key)
            .or_insert_with(|| TimeBucket::new(key))
            .add(&event.entity, event.level);

        if event.level.is_error_class() {
            focus.samples.push(ErrorSample {
                timestamp: event.timestamp,
                entity: event.entity.clone(),
                level: event.level,
                message: extract_message(raw_line, &event.entity, FOCUS_SAMPLE_MESSAGE_LEN),
            });
        }
    }
}

impl EventSink for Aggregator {
    fn record_unparsed(&mut self) {
        self.counts.total += 1;
        self.counts.unparsed += 1;
    }

    fn record(&mut self, event: &LogEvent, raw_line: &str) {
        self.counts.total += 1;
        self.counts.parsed += 1;

        if !self.filter.accepts(event) {
            return;
        }
        self.counts.matched += 1;

        TimeRange::extend(&mut self.range, event.timestamp);

        let key = bucket_key(event.timestamp, self.interval_sec);
        self.buckets
            .entry(key)
            .or_insert_with(|| TimeBucket::new(key))
            .add(&event.entity, event.level);

        self.level_totals.incr(event.level);
        let stats = self.entities.entry(event.entity.clone()).or_default();
        stats.total += 1;
        stats.levels.incr(event.level);

        self.record_focus(event, raw_line);
        self.track_gap(event);

        if event.level.is_error_class() {
            self.samples.push(ErrorSample {
                timestamp: event.timestamp,
                entity: event.entity.clone(),
                level: event.level,
                message: extract_message(raw_line, &event.entity, SAMPLE_MESSAGE_LEN),
            });
        }
    }
}

fn spikes_of<'a>(buckets: impl Iterator<Item = &'a TimeBucket> + Clone, factor: f64) -> Vec<Spike> {
    let (sum, n) = buckets
        .clone()
        .fold((0u64, 0u64), |(sum, n), b| (sum + b.total, n + 1));
    if n == 0 || sum == 0 {
        return Vec::new();
    }
    let avg = sum as f64 / n as f64;
    buckets
        .filter(|b| b.total as f64 > avg * factor)
        .map(|b| Spike {
            key: b.key,
            total: b.total,
            ratio: b.total as f64 / avg,
        })
        .collect()
}

fn number_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"\d+\.\d+").expect("decimal pattern is valid"),
            Regex::new(r"\b\d+\b").expect("integer pattern is valid"),
        )
    })
}

/// Replaces decimal numbers and standalone integers with `N`.
pub fn normalize_message(message: &str) -> String {
    let (decimal, integer) = number_patterns();
    let replaced = decimal.replace_all(message, "N");
    integer.replace_all(&replaced, "N").into_owned()
}

fn group_patterns<'a>(
    samples: impl Iterator<Item = &'a ErrorSample>,
    prefix_len: usize,
    by_entity: bool,
) -> Vec<ErrorPattern> {
    let mut index: HashMap<(Option<String>, Level, String), usize> = HashMap::new();
    let mut groups: Vec<ErrorPattern> = Vec::new();

    for sample in samples {
        let pattern: String = normalize_message(&sample.message)
            .chars()
            .take(prefix_len)
            .collect();
        let entity = by_entity.then(|| sample.entity.clone());
        let key = (entity.clone(), sample.level, pattern.clone());

        match index.get(&key) {
            Some(&idx) => groups[idx].count += 1,
            None => {
                let example = if by_entity {
                    sample.message.chars().take(PATTERN_PREFIX_LEN).collect()
                } else {
                    let msg: String = sample.message.chars().take(PATTERN_PREFIX_LEN).collect();
                    format!("{}: {}", sample.entity, msg.trim_start_matches(':').trim_start())
                };
                index.insert(key, groups.len());
                groups.push(ErrorPattern {
                    entity,
                    level: sample.level,
                    pattern,
                    count: 1,
                    example,
                });
            }
        }
    }

    // Stable: equal counts keep first-seen order
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}
