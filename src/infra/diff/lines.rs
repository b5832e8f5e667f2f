use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use similar::{Algorithm, ChangeTag, TextDiff};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const NO_DIFFERENCES_MESSAGE: &str = "No differences";
pub const DIFF_FAILED_MESSAGE: &str = "Diff failed: file may be too large";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of a display line. The last three are synthetic markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Unchanged,
    Added,
    Removed,
    /// Stands in for a run of hidden unchanged lines.
    Omitted,
    NoChanges,
    Failed,
}

/// One line of a computed diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub tag: LineTag,
    pub content: String,
    /// 1-based line number in the original text.
    pub original_line: Option<u32>,
    /// 1-based line number in the modified text.
    pub modified_line: Option<u32>,
}

impl DiffLine {
    pub fn unchanged(content: impl Into<String>, original_line: u32, modified_line: u32) -> Self {
        Self {
            tag: LineTag::Unchanged,
            content: content.into(),
            original_line: Some(original_line),
            modified_line: Some(modified_line),
        }
    }

    pub fn added(content: impl Into<String>, modified_line: u32) -> Self {
        Self {
            tag: LineTag::Added,
            content: content.into(),
            original_line: None,
            modified_line: Some(modified_line),
        }
    }

    pub fn removed(content: impl Into<String>, original_line: u32) -> Self {
        Self {
            tag: LineTag::Removed,
            content: content.into(),
            original_line: Some(original_line),
            modified_line: None,
        }
    }

    pub fn omitted(count: usize) -> Self {
        let noun = if count == 1 { "line" } else { "lines" };
        Self::marker(LineTag::Omitted, format!("... {count} unchanged {noun} omitted ..."))
    }

    pub fn no_differences() -> Self {
        Self::marker(LineTag::NoChanges, NO_DIFFERENCES_MESSAGE)
    }

    pub fn failed() -> Self {
        Self::marker(LineTag::Failed, DIFF_FAILED_MESSAGE)
    }

    fn marker(tag: LineTag, content: impl Into<String>) -> Self {
        Self {
            tag,
            content: content.into(),
            original_line: None,
            modified_line: None,
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self.tag, LineTag::Added | LineTag::Removed)
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self.tag,
            LineTag::Omitted | LineTag::NoChanges | LineTag::Failed
        )
    }
}

/// Guards applied to a diff computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub timeout: Duration,
    /// Combined input size above which the diff is not attempted.
    pub max_bytes: Option<usize>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: None,
        }
    }
}

#[derive(Debug, Error)]
enum DiffFailure {
    #[error("inputs are {bytes} bytes, limit is {limit}")]
    TooLarge { bytes: usize, limit: usize },
    #[error("diff exceeded {0:?}")]
    TimedOut(Duration),
    #[error("diff computation panicked")]
    Panicked,
}

/// Diff two texts line by line with the default guards.
pub fn diff_lines(original: &str, modified: &str) -> Vec<DiffLine> {
    diff_lines_with(original, modified, &DiffOptions::default())
}

/// Diff two texts line by line.
///
/// Never fails: an oversized input, a timeout or an internal failure yields a
/// single [`LineTag::Failed`] line instead.
pub fn diff_lines_with(original: &str, modified: &str, options: &DiffOptions) -> Vec<DiffLine> {
    match try_diff_lines(original, modified, options) {
        Ok(lines) => lines,
        Err(err) => {
            log::warn!(target: "diff", "line diff failed: {err}");
            vec![DiffLine::failed()]
        }
    }
}

fn try_diff_lines(
    original: &str,
    modified: &str,
    options: &DiffOptions,
) -> Result<Vec<DiffLine>, DiffFailure> {
    let bytes = original.len() + modified.len();
    if let Some(limit) = options.max_bytes
        && bytes > limit
    {
        return Err(DiffFailure::TooLarge { bytes, limit });
    }

    let original = normalize_line_endings(original);
    let modified = normalize_line_endings(modified);
    let started = Instant::now();
    let lines = catch_unwind(AssertUnwindSafe(|| {
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .deadline(started + options.timeout)
            .diff_lines(original.as_ref(), modified.as_ref());

        diff.iter_all_changes()
            .map(|change| {
                let text = strip_line_ending(change.value());
                let old = change.old_index().map(to_line_number);
                let new = change.new_index().map(to_line_number);
                match change.tag() {
                    ChangeTag::Equal => DiffLine {
                        tag: LineTag::Unchanged,
                        content: text.to_string(),
                        original_line: old,
                        modified_line: new,
                    },
                    ChangeTag::Delete => DiffLine::removed(text, old.unwrap_or_default()),
                    ChangeTag::Insert => DiffLine::added(text, new.unwrap_or_default()),
                }
            })
            .collect::<Vec<_>>()
    }))
    .map_err(|_| DiffFailure::Panicked)?;

    if started.elapsed() > options.timeout {
        return Err(DiffFailure::TimedOut(options.timeout));
    }
    Ok(lines)
}

/// CRLF becomes LF and a missing final newline is added, so line endings
/// alone never count as a change.
fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    let mut text = if text.contains("\r\n") {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    };
    if !text.is_empty() && !text.ends_with('\n') {
        text.to_mut().push('\n');
    }
    text
}

fn strip_line_ending(value: &str) -> &str {
    let value = value.strip_suffix('\n').unwrap_or(value);
    value.strip_suffix('\r').unwrap_or(value)
}

fn to_line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

/// Hide long unchanged runs behind "omitted" markers.
///
/// A negative `context_lines` returns the input untouched. Otherwise every
/// changed line keeps `context_lines` neighbours on each side, overlapping
/// windows merge, and each hidden run (including one at the start or end)
/// becomes a single [`LineTag::Omitted`] line. Input without changes
/// collapses to one [`LineTag::NoChanges`] line.
pub fn apply_context_collapsing(lines: &[DiffLine], context_lines: i32) -> Vec<DiffLine> {
    let Ok(context) = usize::try_from(context_lines) else {
        return lines.to_vec();
    };

    let changed: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.is_change())
        .map(|(idx, _)| idx)
        .collect();

    if changed.is_empty() {
        return vec![DiffLine::no_differences()];
    }

    let last = lines.len() - 1;
    let mut windows: Vec<(usize, usize)> = Vec::new();
    for idx in changed {
        let start = idx.saturating_sub(context);
        let end = idx.saturating_add(context).min(last);
        match windows.last_mut() {
            Some((_, prev_end)) if start <= *prev_end + 1 => *prev_end = (*prev_end).max(end),
            _ => windows.push((start, end)),
        }
    }

    let mut out = Vec::new();
    let mut cursor = 0usize;
    for (start, end) in windows {
        if start > cursor {
            out.push(DiffLine::omitted(start - cursor));
        }
        out.extend_from_slice(&lines[start..=end]);
        cursor = end + 1;
    }
    if cursor <= last {
        out.push(DiffLine::omitted(last + 1 - cursor));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(lines: &[DiffLine]) -> Vec<LineTag> {
        lines.iter().map(|l| l.tag).collect()
    }

    #[test]
    fn test_diff_replaced_middle_line() {
        let lines = diff_lines("a\nb\nc", "a\nx\nc");
        assert_eq!(
            lines,
            vec![
                DiffLine::unchanged("a", 1, 1),
                DiffLine::removed("b", 2),
                DiffLine::added("x", 2),
                DiffLine::unchanged("c", 3, 3),
            ]
        );
    }

    #[test]
    fn test_diff_identical_inputs() {
        let lines = diff_lines("one\ntwo\n", "one\ntwo\n");
        assert_eq!(tags(&lines), vec![LineTag::Unchanged, LineTag::Unchanged]);
    }

    #[test]
    fn test_diff_crlf_endings_are_stripped() {
        let lines = diff_lines("a\r\nb\r\n", "a\r\nc\r\n");
        assert_eq!(lines[0].content, "a");
        assert_eq!(lines[1], DiffLine::removed("b", 2));
        assert_eq!(lines[2], DiffLine::added("c", 2));
    }

    #[test]
    fn test_diff_ignores_line_ending_only_differences() {
        let lines = diff_lines("a\nb", "a\nb\n");
        assert_eq!(tags(&lines), vec![LineTag::Unchanged, LineTag::Unchanged]);

        let lines = diff_lines("a\r\nb\r\n", "a\nb");
        assert!(lines.iter().all(|l| l.tag == LineTag::Unchanged));
        assert_eq!(lines[1], DiffLine::unchanged("b", 2, 2));

        assert!(diff_lines("", "").is_empty());
    }

    #[test]
    fn test_diff_timeout_yields_placeholder() {
        let original: String = (0..200).map(|i| format!("line {i}\n")).collect();
        let modified: String = (0..200).map(|i| format!("line {}\n", i * 7 % 200)).collect();
        let options = DiffOptions {
            timeout: Duration::ZERO,
            max_bytes: None,
        };
        assert_eq!(
            diff_lines_with(&original, &modified, &options),
            vec![DiffLine::failed()]
        );
    }

    #[test]
    fn test_diff_too_large_yields_placeholder() {
        let options = DiffOptions {
            max_bytes: Some(4),
            ..DiffOptions::default()
        };
        let lines = diff_lines_with("hello", "world", &options);
        assert_eq!(lines, vec![DiffLine::failed()]);
        assert_eq!(lines[0].content, DIFF_FAILED_MESSAGE);
    }

    #[test]
    fn test_collapse_negative_context_is_identity() {
        let lines = diff_lines("a\nb\nc\nd", "a\nB\nc\nd");
        assert_eq!(apply_context_collapsing(&lines, -1), lines);
    }

    #[test]
    fn test_collapse_without_changes() {
        let lines = diff_lines("a\nb", "a\nb");
        let out = apply_context_collapsing(&lines, 3);
        assert_eq!(out, vec![DiffLine::no_differences()]);

        let out = apply_context_collapsing(&[], 0);
        assert_eq!(out, vec![DiffLine::no_differences()]);
    }

    #[test]
    fn test_collapse_hides_leading_and_trailing_runs() {
        let original: Vec<String> = (1..=20).map(|n| format!("line {n}")).collect();
        let mut modified = original.clone();
        modified[9] = "changed".to_string();
        let lines = diff_lines(&original.join("\n"), &modified.join("\n"));

        let out = apply_context_collapsing(&lines, 2);
        assert_eq!(out.first().map(|l| l.tag), Some(LineTag::Omitted));
        assert_eq!(out.last().map(|l| l.tag), Some(LineTag::Omitted));
        assert_eq!(out[0].content, "... 7 unchanged lines omitted ...");
        assert_eq!(out.last().unwrap().content, "... 8 unchanged lines omitted ...");
        // 2 context + removed + added + 2 context, plus two markers.
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_collapse_merges_overlapping_windows() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n9\n10";
        let modified = "1\nX\n3\n4\nY\n6\n7\n8\n9\n10";
        let lines = diff_lines(original, modified);

        let out = apply_context_collapsing(&lines, 1);
        let omitted: Vec<_> = out.iter().filter(|l| l.tag == LineTag::Omitted).collect();
        assert_eq!(omitted.len(), 1);
        assert_eq!(omitted[0].content, "... 4 unchanged lines omitted ...");
        assert_eq!(out[0].content, "1");
    }

    #[test]
    fn test_collapse_zero_context_separates_changes() {
        let lines = diff_lines("a\nb\nc", "A\nb\nC");
        let out = apply_context_collapsing(&lines, 0);
        assert_eq!(
            tags(&out),
            vec![
                LineTag::Removed,
                LineTag::Added,
                LineTag::Omitted,
                LineTag::Removed,
                LineTag::Added,
            ]
        );
        assert_eq!(out[2].content, "... 1 unchanged line omitted ...");
    }
}
