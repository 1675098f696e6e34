pub mod batch;
pub mod bounded;
pub mod bucket;
pub mod filter;
pub mod rolling;

pub use batch::{Aggregator, AggregatorOptions, ErrorPattern, GapRecord, Spike};
pub use bounded::{BoundedCollection, Fifo, FirstN, ReplaceSmallest, RingBuffer, SampleBuffer, TopRanked};
pub use bucket::{bucket_key, bucket_label, LevelCounts, TimeBucket};
pub use filter::{EventFilter, FocusQuery};
pub use rolling::{Alert, RollingAggregator, RollingOptions, Snapshot};

use crate::source::event::LogEvent;

/// Line counters kept by every aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
    pub total: u64,
    pub parsed: u64,
    pub unparsed: u64,
    /// Parsed lines that passed the primary filter.
    pub matched: u64,
}

/// Receives one call per complete line read by an ingestion engine.
pub trait EventSink {
    /// A line none of the parser's formats recognised.
    fn record_unparsed(&mut self);

    /// A parsed line. `raw_line` is the decoded text, used for message
    /// extraction.
    fn record(&mut self, event: &LogEvent, raw_line: &str);
}
