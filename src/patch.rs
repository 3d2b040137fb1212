//! Line-ranged patch application with before-text verification.
//!
//! The engine is a pure function over content plus suggestions: it never
//! touches the file system. Every suggestion carries the exact text it
//! expects to replace; a mismatch means the file moved on since the
//! suggestion was computed, and the suggestion is skipped and reported
//! rather than mis-applied.
//!
//! Batches apply in descending start-line order so an edit that changes
//! the line count never invalidates the positions of edits above it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// What a suggestion changes. Free-form tags from the model are folded
/// into this set during parsing; anything unrecognized becomes `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Docstring,
    Comment,
    Refactor,
    Rename,
    #[default]
    Other,
}

/// Coarse severity used for display ordering, not for gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    #[default]
    Low,
    Medium,
    High,
}

/// One AI-proposed edit scoped to a 1-indexed, inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// First line to replace, 1-indexed.
    pub start_line: usize,
    /// Last line to replace, inclusive. Must be >= `start_line`.
    pub end_line: usize,
    /// Exact text currently expected at the range.
    pub before: String,
    /// Replacement text; may span a different number of lines.
    pub after: String,
    #[serde(default)]
    pub kind: SuggestionKind,
    #[serde(default)]
    pub impact: Impact,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("insert position {position} out of range (file has {line_count} lines)")]
    InvalidInsertPosition { position: usize, line_count: usize },
}

/// Result of applying a batch of suggestions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "ApplyOutcome reports skipped suggestions that may need attention"]
pub struct ApplyOutcome {
    pub new_content: String,
    pub applied: usize,
    pub skipped: Vec<Suggestion>,
}

/// Normalize line endings to `\n` and drop one trailing newline, so that
/// a block of replacement text splices in cleanly regardless of how it
/// was terminated.
fn normalize_block(text: &str) -> String {
    let mut unified = text.replace("\r\n", "\n");
    if unified.ends_with('\n') {
        unified.pop();
    }
    unified
}

fn split_lines(text: &str) -> Vec<String> {
    normalize_block(text).split('\n').map(str::to_string).collect()
}

/// Check an expected block against the current line span.
///
/// Both sides are compared line-by-line under the same split. A block
/// whose raw lines match the span as-is matches; otherwise one trailing
/// newline on the block is taken as a terminator rather than a final
/// empty line and the comparison is retried without it. The raw check
/// runs first so a block that really does end in an empty line still
/// matches a span covering one.
fn block_matches(span: &[String], expected: &str) -> bool {
    let unified = expected.replace("\r\n", "\n");
    if span.iter().map(String::as_str).eq(unified.split('\n')) {
        return true;
    }
    match unified.strip_suffix('\n') {
        Some(stripped) => span.iter().map(String::as_str).eq(stripped.split('\n')),
        None => false,
    }
}

/// Apply `suggestions` to `content`, skipping any whose expected text no
/// longer matches.
///
/// Suggestions are applied in descending `start_line` order (stable for
/// equal starts), so earlier edits never shift the ranges of pending
/// ones. Output uses `\n` endings and preserves whether the input ended
/// with a newline.
pub fn apply(content: &str, suggestions: &[Suggestion]) -> ApplyOutcome {
    let had_trailing_newline = content.ends_with('\n') || content.ends_with("\r\n");
    let mut lines = split_lines(content);
    // An empty file splits into one empty line; treat it as zero lines so
    // ranges past EOF are consistently stale.
    if lines.len() == 1 && lines[0].is_empty() && content.is_empty() {
        lines.clear();
    }

    let mut order: Vec<usize> = (0..suggestions.len()).collect();
    order.sort_by(|&a, &b| suggestions[b].start_line.cmp(&suggestions[a].start_line));

    let mut applied = 0;
    let mut skipped = Vec::new();

    for idx in order {
        let suggestion = &suggestions[idx];
        if !try_apply(&mut lines, suggestion) {
            debug!(
                start = suggestion.start_line,
                end = suggestion.end_line,
                kind = ?suggestion.kind,
                "suggestion is stale, skipping"
            );
            skipped.push(suggestion.clone());
        } else {
            applied += 1;
        }
    }

    // Report skips in the order the caller supplied them.
    skipped.sort_by_key(|s| {
        suggestions
            .iter()
            .position(|orig| orig == s)
            .unwrap_or(usize::MAX)
    });

    let mut new_content = lines.join("\n");
    if had_trailing_newline && !new_content.is_empty() {
        new_content.push('\n');
    }

    ApplyOutcome {
        new_content,
        applied,
        skipped,
    }
}

/// Splice one suggestion into `lines` if its range and before-text hold.
fn try_apply(lines: &mut Vec<String>, suggestion: &Suggestion) -> bool {
    let Suggestion {
        start_line,
        end_line,
        ..
    } = *suggestion;

    if start_line == 0 || end_line < start_line || end_line > lines.len() {
        return false;
    }

    if !block_matches(&lines[start_line - 1..end_line], &suggestion.before) {
        return false;
    }

    let replacement = split_lines(&suggestion.after);
    lines.splice(start_line - 1..end_line, replacement);
    true
}

/// Whole-file replacement: the degenerate case with no line range.
pub fn replace_all(new_content: &str) -> ApplyOutcome {
    ApplyOutcome {
        new_content: new_content.to_string(),
        applied: 1,
        skipped: Vec::new(),
    }
}

/// Append `block` after a trailing-whitespace-normalized end of file,
/// separated by exactly one blank line.
pub fn append_block(content: &str, block: &str) -> String {
    let body = content.trim_end();
    let block = block.trim_end();
    if body.is_empty() {
        format!("{block}\n")
    } else {
        format!("{body}\n\n{block}\n")
    }
}

/// Insert `block` before 1-indexed line `position`, padded with one blank
/// line on each side. `position` may be `line_count + 1` to insert at EOF.
pub fn insert_block(content: &str, position: usize, block: &str) -> Result<String, PatchError> {
    let had_trailing_newline = content.ends_with('\n') || content.ends_with("\r\n");
    let mut lines = split_lines(content);
    if lines.len() == 1 && lines[0].is_empty() && content.is_empty() {
        lines.clear();
    }

    if position == 0 || position > lines.len() + 1 {
        return Err(PatchError::InvalidInsertPosition {
            position,
            line_count: lines.len(),
        });
    }

    let mut insertion = vec![String::new()];
    insertion.extend(split_lines(block.trim_end()));
    insertion.push(String::new());

    let at = position - 1;
    lines.splice(at..at, insertion);

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
