use super::priority::{filter_critical_blocks, is_critical};
use crate::domain::{BlockId, BlockStatus, BlockType, DiffBlock, SnapshotFile};
use serde::{Deserialize, Serialize};

/// Line totals by change type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub additions: u32,
    pub deletions: u32,
    pub modifications: u32,
}

impl DiffSummary {
    pub fn from_blocks(blocks: &[DiffBlock]) -> Self {
        let mut summary = Self::default();
        for block in blocks {
            match block.block_type {
                BlockType::Added => summary.additions += block.modified_span(),
                BlockType::Removed => summary.deletions += block.original_span(),
                BlockType::Modified => summary.modifications += block.changed_span(),
            }
        }
        summary
    }
}

/// Review view showing only blocks that must be looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactDiff {
    pub file_path: String,
    pub critical_blocks: Vec<DiffBlock>,
    pub total_blocks: usize,
    pub summary: DiffSummary,
}

/// Jump target for one block in the full view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockNavigation {
    pub block_id: BlockId,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub status: BlockStatus,
    pub line_number: u32,
    pub description: String,
}

/// Review view with both versions and every block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullDiff {
    pub file_path: String,
    pub original_content: String,
    pub modified_content: String,
    pub blocks: Vec<DiffBlock>,
    /// The original content split into raw lines.
    pub context: Vec<String>,
    pub navigation: Vec<BlockNavigation>,
}

/// Counts used to decide whether to prompt for review at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub total_blocks: usize,
    pub pending_blocks: usize,
    pub accepted_blocks: usize,
    pub rejected_blocks: usize,
    pub critical_blocks: usize,
}

pub fn generate_compact_diff(file: &SnapshotFile) -> CompactDiff {
    CompactDiff {
        file_path: file.file_path.clone(),
        critical_blocks: filter_critical_blocks(&file.blocks),
        total_blocks: file.blocks.len(),
        summary: DiffSummary::from_blocks(&file.blocks),
    }
}

pub fn generate_full_diff(file: &SnapshotFile) -> FullDiff {
    FullDiff {
        file_path: file.file_path.clone(),
        original_content: file.original_content.clone(),
        modified_content: file.modified_content.clone(),
        blocks: file.blocks.clone(),
        context: file.original_content.lines().map(str::to_string).collect(),
        navigation: file.blocks.iter().map(navigation_entry).collect(),
    }
}

fn navigation_entry(block: &DiffBlock) -> BlockNavigation {
    BlockNavigation {
        block_id: block.id,
        block_type: block.block_type,
        status: block.status,
        line_number: block.original_start,
        description: describe_block(block),
    }
}

/// Human-readable one-liner such as "Added 3 lines".
pub fn describe_block(block: &DiffBlock) -> String {
    let (verb, count) = match block.block_type {
        BlockType::Added => ("Added", block.modified_span()),
        BlockType::Removed => ("Removed", block.original_span()),
        BlockType::Modified => ("Modified", block.changed_span()),
    };
    let noun = if count == 1 { "line" } else { "lines" };
    format!("{verb} {count} {noun}")
}

pub fn has_critical_changes(file: &SnapshotFile) -> bool {
    file.blocks.iter().any(is_critical)
}

pub fn get_file_stats(file: &SnapshotFile) -> FileStats {
    let counts = file.counts();
    FileStats {
        total_blocks: counts.total,
        pending_blocks: counts.pending,
        accepted_blocks: counts.accepted,
        rejected_blocks: counts.rejected,
        critical_blocks: file.blocks.iter().filter(|b| is_critical(b)).count(),
    }
}
