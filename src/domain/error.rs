//! Domain error types for the snapshot engine.
//!
//! Read paths never surface these; they log and degrade. Terminal writes at
//! file and session granularity do, so callers can retry.

use super::snapshot::{BlockId, BlockStatus};
use thiserror::Error;

/// Errors raised by snapshot state operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("File not tracked: session={session_id}, file={file_path}")]
    FileNotFound {
        session_id: String,
        file_path: String,
    },

    #[error("Diff block not found: file={file_path}, block={block_id}")]
    BlockNotFound { file_path: String, block_id: BlockId },

    #[error("Diff block {block_id} in {file_path} is already {status}")]
    BlockAlreadyResolved {
        file_path: String,
        block_id: BlockId,
        status: BlockStatus,
    },

    #[error("Snapshot backend operation failed: {0}")]
    Adapter(#[from] anyhow::Error),
}

/// Errors raised by the file lock coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("File is not locked: {0}")]
    NotLocked(String),

    #[error("Session {session_id} does not hold the lock on {file_path} (held by {holder})")]
    NotHolder {
        file_path: String,
        session_id: String,
        holder: String,
    },
}
