//! Write-ownership types for files touched by concurrent sessions.

use super::snapshot::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current write ownership of a file by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    pub session_id: SessionId,
    pub locked_at: DateTime<Utc>,
    /// What the holder is doing (e.g. "write", "edit").
    pub operation_type: String,
    /// Tool that requested the lock.
    pub tool_name: String,
}

/// A second session tried to touch a file another session holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub conflicting_file: String,
    /// The session that was denied.
    pub current_session: SessionId,
    /// The session holding the lock.
    pub blocking_session: SessionId,
    pub blocking_operation: String,
}

/// A session blocked behind a lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub session_id: SessionId,
    pub requested_at: DateTime<Utc>,
    /// Carried over to the lock when this entry is granted.
    pub operation_type: String,
    pub tool_name: String,
}

/// Why a lock was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The holder finished its operation.
    Completed,
    /// The holder's changes were rejected.
    Rejected,
    /// The lock outlived the configured timeout.
    Expired,
    /// The holding session was cleared.
    SessionCleared,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
            Self::SessionCleared => write!(f, "session_cleared"),
        }
    }
}

/// Result of a lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The file was free and now belongs to the requester.
    Granted(FileLock),
    /// The requester already held the file.
    AlreadyHeld(FileLock),
    /// Another session holds the file; the requester is queued.
    Queued {
        conflict: ConflictInfo,
        /// Zero-based position in the waiting queue.
        position: usize,
    },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_) | Self::AlreadyHeld(_))
    }
}
