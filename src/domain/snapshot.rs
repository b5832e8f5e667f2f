//! Snapshot session domain types.
//!
//! A session is one agent run. Every file the run touches becomes a
//! [`SnapshotFile`] whose changes are split into independently reviewable
//! [`DiffBlock`]s. Statuses roll up block → file → session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an agent run.
pub type SessionId = String;

/// Integer identifier of a block within one file.
pub type BlockId = u32;

/// Composite key of a tracked file: a path is only unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub session_id: SessionId,
    pub file_path: String,
}

impl FileKey {
    pub fn new(session_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            file_path: file_path.into(),
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.file_path)
    }
}

/// A user decision on a block, file or session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    /// The terminal block status this decision resolves to.
    pub fn block_status(self) -> BlockStatus {
        match self {
            Self::Accept => BlockStatus::Accepted,
            Self::Reject => BlockStatus::Rejected,
        }
    }

    /// The terminal file status this decision resolves to.
    pub fn file_status(self) -> FileStatus {
        match self {
            Self::Accept => FileStatus::Accepted,
            Self::Reject => FileStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept" | "accepted" | "approve" => Ok(Self::Accept),
            "reject" | "rejected" | "discard" => Ok(Self::Reject),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// Shape of a changed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// Review status of a single block. `Pending` is the only non-terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl BlockStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for BlockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown block status: {other}")),
        }
    }
}

/// Significance of a block for compact review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockPriority {
    Critical,
    Important,
    #[default]
    Minor,
}

impl fmt::Display for BlockPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Important => write!(f, "important"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// Aggregate status of one file, derived from its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Pending,
    Partial,
    Accepted,
    Rejected,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// Roll up block statuses into a file status.
    ///
    /// No blocks is `Pending`. Pending blocks mixed with any decided block is
    /// `Partial`. Once nothing is pending, a uniform decision wins and a mix of
    /// accepted and rejected is `Partial`.
    pub fn from_blocks<'a>(statuses: impl IntoIterator<Item = &'a BlockStatus>) -> Self {
        let (mut pending, mut accepted, mut rejected) = (0usize, 0usize, 0usize);
        for status in statuses {
            match status {
                BlockStatus::Pending => pending += 1,
                BlockStatus::Accepted => accepted += 1,
                BlockStatus::Rejected => rejected += 1,
            }
        }

        match (pending > 0, accepted > 0, rejected > 0) {
            (false, false, false) => Self::Pending,
            (true, false, false) => Self::Pending,
            (true, _, _) => Self::Partial,
            (false, true, false) => Self::Accepted,
            (false, false, true) => Self::Rejected,
            (false, true, true) => Self::Partial,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Partial => write!(f, "partial"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Aggregate status of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The agent is still producing changes; nothing has been diffed yet.
    #[default]
    Working,
    Pending,
    Partial,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::Pending => write!(f, "pending"),
            Self::Partial => write!(f, "partial"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One contiguous changed region between two versions of a file.
///
/// Line ranges are 1-based and inclusive. A side with no lines has
/// `end == start - 1`, where `start` is the line the change sits before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBlock {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default)]
    pub status: BlockStatus,
    pub original_start: u32,
    pub original_end: u32,
    pub modified_start: u32,
    pub modified_end: u32,
    pub original_text: String,
    pub modified_text: String,
    #[serde(default)]
    pub priority: BlockPriority,
}

impl DiffBlock {
    pub fn original_span(&self) -> u32 {
        (self.original_end + 1).saturating_sub(self.original_start)
    }

    pub fn modified_span(&self) -> u32 {
        (self.modified_end + 1).saturating_sub(self.modified_start)
    }

    /// Number of lines the block touches on its larger side.
    pub fn changed_span(&self) -> u32 {
        self.original_span().max(self.modified_span())
    }

    /// Whether two blocks describe the same change, ignoring review state.
    pub fn same_change(&self, other: &DiffBlock) -> bool {
        self.block_type == other.block_type
            && self.original_start == other.original_start
            && self.original_end == other.original_end
            && self.modified_start == other.modified_start
            && self.modified_end == other.modified_end
            && self.original_text == other.original_text
            && self.modified_text == other.modified_text
    }
}

/// One workspace file under review within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub file_path: String,
    pub session_id: SessionId,
    /// Empty until loaded from the adapter.
    #[serde(default)]
    pub original_content: String,
    #[serde(default)]
    pub modified_content: String,
    /// False while the contents above are placeholders.
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub status: FileStatus,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub blocks: Vec<DiffBlock>,
}

impl SnapshotFile {
    /// Placeholder entry pending a lazy content load.
    pub fn placeholder(session_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            session_id: session_id.into(),
            original_content: String::new(),
            modified_content: String::new(),
            loaded: false,
            status: FileStatus::Pending,
            last_modified: Utc::now(),
            blocks: Vec::new(),
        }
    }

    pub fn key(&self) -> FileKey {
        FileKey::new(self.session_id.clone(), self.file_path.clone())
    }

    pub fn block(&self, block_id: BlockId) -> Option<&DiffBlock> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    pub fn block_mut(&mut self, block_id: BlockId) -> Option<&mut DiffBlock> {
        self.blocks.iter_mut().find(|b| b.id == block_id)
    }

    /// Recompute `status` from the blocks.
    ///
    /// A file without blocks keeps whatever status it already has, so a
    /// file-level decision on a never-diffed file is not lost.
    pub fn recompute_status(&mut self) {
        if !self.blocks.is_empty() {
            self.status = FileStatus::from_blocks(self.blocks.iter().map(|b| &b.status));
        }
    }

    pub fn counts(&self) -> BlockCounts {
        BlockCounts::from_blocks(&self.blocks)
    }
}

/// Per-status block tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockCounts {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
}

impl BlockCounts {
    pub fn from_blocks(blocks: &[DiffBlock]) -> Self {
        let mut counts = Self::default();
        for block in blocks {
            counts.total += 1;
            match block.status {
                BlockStatus::Pending => counts.pending += 1,
                BlockStatus::Accepted => counts.accepted += 1,
                BlockStatus::Rejected => counts.rejected += 1,
            }
        }
        counts
    }

    pub fn add(&mut self, other: BlockCounts) {
        self.total += other.total;
        self.pending += other.pending;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
    }
}

/// Backend statistics for a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub total_files: usize,
    pub total_turns: usize,
    pub total_changes: usize,
}

/// Aggregated state of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    /// Tracked files in first-touch order.
    pub files: Vec<String>,
    pub total_blocks: usize,
    pub accepted_blocks: usize,
    pub rejected_blocks: usize,
    pub pending_blocks: usize,
    pub status: SessionStatus,
    pub last_activity: DateTime<Utc>,
    /// Last stats reported by the backend, if any were fetched.
    #[serde(default)]
    pub stats: Option<SessionStats>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            files: Vec::new(),
            total_blocks: 0,
            accepted_blocks: 0,
            rejected_blocks: 0,
            pending_blocks: 0,
            status: SessionStatus::Working,
            last_activity: Utc::now(),
            stats: None,
        }
    }

    pub fn tracks(&self, file_path: &str) -> bool {
        self.files.iter().any(|f| f == file_path)
    }

    /// Register a file, keeping first-touch order. Returns false if already tracked.
    pub fn track(&mut self, file_path: &str) -> bool {
        if self.tracks(file_path) {
            return false;
        }
        self.files.push(file_path.to_string());
        true
    }

    /// Apply summed block counts and derive the session status.
    ///
    /// With no blocks loaded the session stays `Working` unless every tracked
    /// file already carries a terminal status.
    pub fn apply_counts(&mut self, counts: BlockCounts, all_files_terminal: bool) {
        self.total_blocks = counts.total;
        self.pending_blocks = counts.pending;
        self.accepted_blocks = counts.accepted;
        self.rejected_blocks = counts.rejected;

        self.status = if counts.total == 0 {
            if all_files_terminal && !self.files.is_empty() {
                SessionStatus::Completed
            } else {
                SessionStatus::Working
            }
        } else if counts.pending == 0 {
            SessionStatus::Completed
        } else if counts.accepted > 0 || counts.rejected > 0 {
            SessionStatus::Partial
        } else {
            SessionStatus::Pending
        };
    }
}
