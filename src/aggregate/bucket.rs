use crate::source::event::Level;
use chrono::{Local, TimeZone};
use std::collections::HashMap;

/// Aligns `ts` down to a multiple of `interval_sec`.
pub fn bucket_key(ts: f64, interval_sec: u64) -> i64 {
    let interval = interval_sec.max(1) as f64;
    ((ts / interval).floor() * interval) as i64
}

/// Human label for a bucket key, in local time. Precision follows the interval.
pub fn bucket_label(key: i64, interval_sec: u64) -> String {
    let format = if interval_sec >= 3600 {
        "%Y-%m-%d %H:00"
    } else if interval_sec >= 60 {
        "%Y-%m-%d %H:%M"
    } else {
        "%Y-%m-%d %H:%M:%S"
    };
    match Local.timestamp_opt(key, 0).single() {
        Some(dt) => dt.format(format).to_string(),
        None => key.to_string(),
    }
}

/// Per-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelCounts([u64; 5]);

impl LevelCounts {
    pub fn incr(&mut self, level: Level) {
        self.0[level.index()] += 1;
    }

    pub fn decr(&mut self, level: Level) {
        let slot = &mut self.0[level.index()];
        *slot = slot.saturating_sub(1);
    }

    pub fn get(&self, level: Level) -> u64 {
        self.0[level.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// ERROR + FATAL
    pub fn errors(&self) -> u64 {
        self.get(Level::Error) + self.get(Level::Fatal)
    }

    pub fn warnings(&self) -> u64 {
        self.get(Level::Warn)
    }

    /// Non-zero levels, most severe first.
    pub fn iter(&self) -> impl Iterator<Item = (Level, u64)> + '_ {
        Level::ALL
            .iter()
            .map(|level| (*level, self.get(*level)))
            .filter(|(_, count)| *count > 0)
    }
}

/// Counts for one fixed-width time interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeBucket {
    pub key: i64,
    pub total: u64,
    pub levels: LevelCounts,
    pub entities: HashMap<String, u64>,
}

impl TimeBucket {
    pub fn new(key: i64) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn add(&mut self, entity: &str, level: Level) {
        self.total += 1;
        self.levels.incr(level);
        match self.entities.get_mut(entity) {
            Some(count) => *count += 1,
            None => {
                self.entities.insert(entity.to_string(), 1);
            }
        }
    }

    pub fn entity_count(&self, entity: &str) -> u64 {
        self.entities.get(entity).copied().unwrap_or(0)
    }

    /// Most active entities, ties broken by name.
    pub fn top_entities(&self, n: usize) -> Vec<(&str, u64)> {
        top_n(self.entities.iter().map(|(k, v)| (k.as_str(), *v)), n)
    }
}

/// Sorts by count descending then name ascending and keeps `n`.
pub(crate) fn top_n<'a>(items: impl Iterator<Item = (&'a str, u64)>, n: usize) -> Vec<(&'a str, u64)> {
    let mut items: Vec<_> = items.collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    items.truncate(n);
    items
}
