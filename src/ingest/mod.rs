pub mod batch;
pub mod follow;

pub use batch::{select_mode, BatchIngestionEngine, BatchReport, IngestError, Progress, ScanMode, ScanOutcome};
pub use follow::{FollowEngine, FollowError, FollowOptions, FollowSummary};
