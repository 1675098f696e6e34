pub mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
