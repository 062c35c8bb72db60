//! Persistent synthesis history ("Resume").
//!
//! Every synthesis leaves a record in a monotonic, single-writer index
//! plus its audio artifact on disk; records can be listed, replayed,
//! deleted, and pruned by retention policy.

use std::path::PathBuf;

pub mod filter;
pub mod player;
pub mod record;
pub mod store;

pub use record::HistoryRecord;
pub use store::Store;

/// Errors from the history store and player.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("history record {0} not found")]
    NotFound(u64),

    #[error("audio file {} is missing", .0.display())]
    FileMissing(PathBuf),

    #[error("io failure")]
    Io(#[from] std::io::Error),

    #[error("index serialization failed")]
    Json(#[from] serde_json::Error),
}
