//! Review generation: block significance and compact/full review views.

pub mod generator;
pub mod priority;

pub use generator::{
    BlockNavigation, CompactDiff, DiffSummary, FileStats, FullDiff, describe_block,
    generate_compact_diff, generate_full_diff, get_file_stats, has_critical_changes,
};
pub use priority::{analyze_priority, filter_critical_blocks, is_critical};

use crate::domain::DiffBlock;
use crate::infra::diff::{DiffOptions, LineTag, build_blocks, diff_lines_with};

/// Diff two versions of a file into prioritized, pending blocks.
///
/// A failed diff yields no blocks.
pub fn blocks_for_contents(original: &str, modified: &str, options: &DiffOptions) -> Vec<DiffBlock> {
    let lines = diff_lines_with(original, modified, options);
    if lines.iter().any(|l| l.tag == LineTag::Failed) {
        return Vec::new();
    }
    let mut blocks = build_blocks(&lines);
    priority::assign_priorities(&mut blocks);
    blocks
}
