//! Word-level diff used to render a proposed edit on top of the text the
//! user is looking at.
//!
//! Every operation is expressed in character offsets of the *original* text,
//! which is exactly what the host is displaying while a preview is up.

use similar::ChangeTag;
use similar::TextDiff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    /// Remove the original characters in `start..end`.
    Delete { start: usize, end: usize },
    /// Insert `text` before the original character at `position`.
    Insert { text: String, position: usize },
}

/// Diff `original` against `modified` on word and whitespace boundaries.
///
/// Adjacent removed tokens collapse into one [`DiffOp::Delete`] and adjacent
/// added tokens into one [`DiffOp::Insert`]. Operations are emitted in
/// increasing original order.
pub fn diff_words(original: &str, modified: &str) -> Vec<DiffOp> {
    let diff = TextDiff::from_words(original, modified);
    let mut ops = Vec::new();
    let mut cursor = 0usize;
    let mut deleting: Option<usize> = None;
    let mut inserting = String::new();

    for change in diff.iter_all_changes() {
        let len = change.value().chars().count();
        match change.tag() {
            ChangeTag::Equal => {
                flush_insert(&mut ops, &mut inserting, cursor);
                flush_delete(&mut ops, &mut deleting, cursor);
                cursor += len;
            }
            ChangeTag::Delete => {
                flush_insert(&mut ops, &mut inserting, cursor);
                deleting.get_or_insert(cursor);
                cursor += len;
            }
            ChangeTag::Insert => {
                flush_delete(&mut ops, &mut deleting, cursor);
                inserting.push_str(change.value());
            }
        }
    }
    flush_insert(&mut ops, &mut inserting, cursor);
    flush_delete(&mut ops, &mut deleting, cursor);
    ops
}

fn flush_delete(ops: &mut Vec<DiffOp>, deleting: &mut Option<usize>, end: usize) {
    if let Some(start) = deleting.take() {
        ops.push(DiffOp::Delete { start, end });
    }
}

fn flush_insert(ops: &mut Vec<DiffOp>, inserting: &mut String, position: usize) {
    if !inserting.is_empty() {
        ops.push(DiffOp::Insert {
            text: std::mem::take(inserting),
            position,
        });
    }
}

/// Apply `ops` (as produced by [`diff_words`]) to `original`, left to right.
pub fn apply_ops(original: &str, ops: &[DiffOp]) -> String {
    let mut chars: Vec<char> = original.chars().collect();
    // Net length change so far; original offsets shift by this much.
    let mut shift = 0isize;
    for op in ops {
        match op {
            DiffOp::Delete { start, end } => {
                let from = start.saturating_add_signed(shift);
                let to = end.saturating_add_signed(shift);
                chars.drain(from..to);
                shift -= (end - start) as isize;
            }
            DiffOp::Insert { text, position } => {
                let at = position.saturating_add_signed(shift);
                let len = text.chars().count();
                chars.splice(at..at, text.chars());
                shift += len as isize;
            }
        }
    }
    chars.into_iter().collect()
}
