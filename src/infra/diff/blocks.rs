use super::lines::{DiffLine, LineTag};
use crate::domain::{BlockPriority, BlockStatus, BlockType, DiffBlock};

/// Group contiguous runs of changed lines into pending blocks.
///
/// Ids are assigned sequentially from 0 in file order. Marker lines end a
/// run. Priorities start at [`BlockPriority::Minor`] and are assigned by the
/// priority analyzer.
pub fn build_blocks(lines: &[DiffLine]) -> Vec<DiffBlock> {
    let mut blocks = Vec::new();
    let mut next_original = 1u32;
    let mut next_modified = 1u32;
    let mut idx = 0usize;

    while idx < lines.len() {
        let line = &lines[idx];
        if !line.is_change() {
            if line.tag == LineTag::Unchanged {
                next_original = line.original_line.map_or(next_original, |n| n + 1);
                next_modified = line.modified_line.map_or(next_modified, |n| n + 1);
            }
            idx += 1;
            continue;
        }

        let original_start = next_original;
        let modified_start = next_modified;
        let mut removed: Vec<&str> = Vec::new();
        let mut added: Vec<&str> = Vec::new();

        while idx < lines.len() && lines[idx].is_change() {
            let line = &lines[idx];
            match line.tag {
                LineTag::Removed => {
                    removed.push(&line.content);
                    next_original = line.original_line.map_or(next_original + 1, |n| n + 1);
                }
                LineTag::Added => {
                    added.push(&line.content);
                    next_modified = line.modified_line.map_or(next_modified + 1, |n| n + 1);
                }
                _ => {}
            }
            idx += 1;
        }

        let block_type = match (removed.is_empty(), added.is_empty()) {
            (true, _) => BlockType::Added,
            (false, true) => BlockType::Removed,
            (false, false) => BlockType::Modified,
        };

        blocks.push(DiffBlock {
            id: u32::try_from(blocks.len()).unwrap_or(u32::MAX),
            block_type,
            status: BlockStatus::Pending,
            original_start,
            original_end: original_start + span(&removed) - 1,
            modified_start,
            modified_end: modified_start + span(&added) - 1,
            original_text: removed.join("\n"),
            modified_text: added.join("\n"),
            priority: BlockPriority::Minor,
        });
    }

    blocks
}

fn span(lines: &[&str]) -> u32 {
    u32::try_from(lines.len()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::diff::lines::diff_lines;

    #[test]
    fn test_blocks_for_replacement() {
        let blocks = build_blocks(&diff_lines("a\nb\nc", "a\nx\nc"));
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.id, 0);
        assert_eq!(block.block_type, BlockType::Modified);
        assert_eq!((block.original_start, block.original_end), (2, 2));
        assert_eq!((block.modified_start, block.modified_end), (2, 2));
        assert_eq!(block.original_text, "b");
        assert_eq!(block.modified_text, "x");
    }

    #[test]
    fn test_blocks_for_pure_insert_and_delete() {
        let blocks = build_blocks(&diff_lines("a\nb\nc\nd\n", "a\nnew1\nnew2\nb\nc\n"));
        assert_eq!(blocks.len(), 2);

        let added = &blocks[0];
        assert_eq!(added.block_type, BlockType::Added);
        assert_eq!(added.original_span(), 0);
        assert_eq!(added.original_start, 2);
        assert_eq!((added.modified_start, added.modified_end), (2, 3));
        assert_eq!(added.modified_text, "new1\nnew2");

        let removed = &blocks[1];
        assert_eq!(removed.id, 1);
        assert_eq!(removed.block_type, BlockType::Removed);
        assert_eq!((removed.original_start, removed.original_end), (4, 4));
        assert_eq!(removed.modified_span(), 0);
    }

    #[test]
    fn test_no_blocks_for_identical_text() {
        assert!(build_blocks(&diff_lines("same\n", "same\n")).is_empty());
    }

    #[test]
    fn test_insert_at_top_of_file() {
        let blocks = build_blocks(&diff_lines("b\n", "a\nb\n"));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].original_start, 1);
        assert_eq!(blocks[0].original_end, 0);
        assert_eq!(blocks[0].modified_span(), 1);
    }
}
