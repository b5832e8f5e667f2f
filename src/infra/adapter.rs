//! Seam to the backend of record.
//!
//! The engine never touches the filesystem; it issues these verbs and treats
//! the backend as the source of truth for file contents.

pub mod memory;

pub use memory::MemoryAdapter;

use crate::domain::{BlockId, SessionStats};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Both sides of one file's change within a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDiff {
    pub file_path: String,
    pub original_content: String,
    pub modified_content: String,
}

#[async_trait]
pub trait SnapshotAdapter: Send + Sync {
    async fn get_session_stats(&self, session_id: &str) -> Result<SessionStats>;
    async fn get_session_files(&self, session_id: &str) -> Result<Vec<String>>;
    async fn get_operation_diff(&self, session_id: &str, file_path: &str) -> Result<OperationDiff>;

    async fn accept_file_modifications(&self, session_id: &str, file_path: &str) -> Result<()>;
    async fn reject_file_modifications(&self, session_id: &str, file_path: &str) -> Result<()>;
    async fn accept_session_modifications(&self, session_id: &str) -> Result<()>;
    async fn reject_session_modifications(&self, session_id: &str) -> Result<()>;

    async fn accept_diff_block(&self, session_id: &str, file_path: &str, block_id: BlockId)
    -> Result<()>;
    async fn reject_diff_block(&self, session_id: &str, file_path: &str, block_id: BlockId)
    -> Result<()>;
}
