//! Structural significance heuristics for diff blocks.
//!
//! Keyword matching is syntax-agnostic and matches anywhere in the text, so
//! `forEach` counts as `for`. Recall matters more than precision here.

use crate::domain::{BlockPriority, DiffBlock};
use lazy_static::lazy_static;
use regex::Regex;

/// Blocks spanning more lines than this are always surfaced.
pub const CRITICAL_SPAN_THRESHOLD: u32 = 5;
/// Blocks spanning more lines than this are at least important.
pub const IMPORTANT_SPAN_THRESHOLD: u32 = 10;

lazy_static! {
    static ref DEFINITION_RE: Regex =
        Regex::new(r"function|class|interface").expect("definition keyword regex");
    static ref MODULE_RE: Regex = Regex::new(r"import|export").expect("module keyword regex");
    static ref CONTROL_FLOW_RE: Regex = Regex::new(r"if|else|for|while|switch|match|return")
        .expect("control flow keyword regex");
    static ref STRUCTURAL_RE: Regex =
        Regex::new(r"function|class|import|export|const|let|var|if|for|while")
            .expect("structural keyword regex");
}

fn block_text(block: &DiffBlock) -> String {
    if block.original_text.is_empty() {
        return block.modified_text.clone();
    }
    if block.modified_text.is_empty() {
        return block.original_text.clone();
    }
    format!("{}\n{}", block.original_text, block.modified_text)
}

/// Classify a block by what its text touches.
///
/// Definitions (`function`, `class`, `interface`) are critical and take
/// precedence; module edges, control flow or a large span are important.
pub fn analyze_priority(block: &DiffBlock) -> BlockPriority {
    let text = block_text(block);
    if DEFINITION_RE.is_match(&text) {
        return BlockPriority::Critical;
    }
    if MODULE_RE.is_match(&text)
        || CONTROL_FLOW_RE.is_match(&text)
        || block.changed_span() > IMPORTANT_SPAN_THRESHOLD
    {
        return BlockPriority::Important;
    }
    BlockPriority::Minor
}

/// Assign every block its analyzed priority.
pub fn assign_priorities(blocks: &mut [DiffBlock]) {
    for block in blocks {
        block.priority = analyze_priority(block);
    }
}

/// Whether a block must be shown in compact review.
pub fn is_critical(block: &DiffBlock) -> bool {
    matches!(
        block.priority,
        BlockPriority::Critical | BlockPriority::Important
    ) || block.changed_span() > CRITICAL_SPAN_THRESHOLD
        || STRUCTURAL_RE.is_match(&block.modified_text)
}

/// Blocks that should always be surfaced, in their original order.
pub fn filter_critical_blocks(blocks: &[DiffBlock]) -> Vec<DiffBlock> {
    blocks.iter().filter(|b| is_critical(b)).cloned().collect()
}
