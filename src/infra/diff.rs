//! Line-level diffing between two versions of a file.
//!
//! `lines` produces the ordered, display-ready line sequence and the context
//! collapsing transform; `blocks` groups changed lines into reviewable blocks.

pub mod blocks;
pub mod lines;

pub use blocks::build_blocks;
pub use lines::{
    DIFF_FAILED_MESSAGE, DiffLine, DiffOptions, LineTag, NO_DIFFERENCES_MESSAGE,
    apply_context_collapsing, diff_lines, diff_lines_with,
};

/// Strip leading `./` and git side prefixes so the same file always maps to one key.
pub fn normalize_file_path(path: &str) -> String {
    path.trim()
        .trim_start_matches("./")
        .trim_start_matches("a/")
        .trim_start_matches("b/")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_file_path() {
        assert_eq!(normalize_file_path("./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_file_path(" b/src/lib.rs "), "src/lib.rs");
        assert_eq!(normalize_file_path("src/lib.rs"), "src/lib.rs");
    }
}
