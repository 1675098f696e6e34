pub mod analyze;
pub mod config;
pub mod follow;
pub mod report;

use crate::config::ConfigError;
use crate::ingest::{FollowError, IngestError};
use crate::source::parser::ParserError;
use crate::storage::CheckpointError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("log file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Follow(#[from] FollowError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Cancels `token` on the first Ctrl+C. Abort the returned handle once the
/// guarded work is over.
pub(crate) fn cancel_on_ctrl_c(
    token: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            token.cancel();
        }
    })
}
