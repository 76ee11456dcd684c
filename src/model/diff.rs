//! Diff statistics for journal entries.
//!
//! A [`DiffStat`] is computed at commit time from the pre-transaction
//! snapshot and the post-commit on-disk content of each affected file:
//! line counts, the names of the enclosing code blocks that changed, and a
//! unified diff for display.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Unified diffs are skipped for inputs above this size; the line counts are
/// still recorded.
const UNIFIED_DIFF_CEILING: usize = 256 * 1024;

/// Per-file change statistics stored alongside a journal entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    /// Lines present after the change but not before.
    pub lines_added: u32,
    /// Lines present before the change but not after.
    pub lines_deleted: u32,
    /// Names of the code blocks (functions, types) containing changed lines.
    pub affected_blocks: Vec<String>,
    /// Unified diff of the change, when the inputs are small enough.
    pub unified_diff: Option<String>,
}

/// Compute the diff statistics between a file's previous and current text.
///
/// `None` stands for "file absent" on either side. `label` names the file in
/// the unified diff header.
#[must_use]
pub fn compute_diff_stat(pre: Option<&str>, post: Option<&str>, label: &str) -> DiffStat {
    let old = pre.unwrap_or("");
    let new = post.unwrap_or("");
    if old == new {
        return DiffStat::default();
    }

    let diff = TextDiff::from_lines(old, new);
    let mut added = 0_u32;
    let mut deleted = 0_u32;
    let old_blocks = block_names_per_line(old);
    let new_blocks = block_names_per_line(new);
    let mut affected: Vec<String> = Vec::new();

    for change in diff.iter_all_changes() {
        let (counter, blocks, index) = match change.tag() {
            ChangeTag::Insert => (&mut added, &new_blocks, change.new_index()),
            ChangeTag::Delete => (&mut deleted, &old_blocks, change.old_index()),
            ChangeTag::Equal => continue,
        };
        *counter += 1;
        if let Some(idx) = index {
            if let Some(Some(name)) = blocks.get(idx) {
                if !affected.iter().any(|n| n == name) {
                    affected.push(name.clone());
                }
            }
        }
    }

    let unified_diff = if old.len() > UNIFIED_DIFF_CEILING || new.len() > UNIFIED_DIFF_CEILING {
        None
    } else {
        Some(
            diff.unified_diff()
                .context_radius(3)
                .header(&format!("a/{label}"), &format!("b/{label}"))
                .to_string(),
        )
    };

    DiffStat {
        lines_added: added,
        lines_deleted: deleted,
        affected_blocks: affected,
        unified_diff,
    }
}

/// For each line, the name of the nearest enclosing block header at or above
/// it, if any.
fn block_names_per_line(text: &str) -> Vec<Option<String>> {
    let mut current: Option<String> = None;
    text.lines()
        .map(|line| {
            if let Some(name) = block_header_name(line) {
                current = Some(name);
            }
            current.clone()
        })
        .collect()
}

/// Best-effort extraction of a block name from a header-looking line.
///
/// Matches declaration shapes common across C-family, Rust, Python, and
/// JavaScript sources: a keyword-prefixed identifier followed by an argument
/// list or an opening brace. Purely heuristic; misses are harmless because
/// block names are display metadata only.
fn block_header_name(line: &str) -> Option<String> {
    const KEYWORDS: &[&str] = &[
        "pub", "async", "const", "static", "unsafe", "export", "public", "private", "protected",
        "final", "abstract",
    ];
    const HEADS: &[&str] = &[
        "fn", "def", "class", "function", "struct", "enum", "trait", "impl", "interface", "mod",
    ];

    let trimmed = line.trim_start();
    let mut words = trimmed.split_whitespace().peekable();
    while let Some(&w) = words.peek() {
        if KEYWORDS.contains(&w) {
            words.next();
        } else {
            break;
        }
    }
    let head = words.next()?;
    if !HEADS.contains(&head) {
        return None;
    }
    let raw = words.next()?;
    let name: String = raw
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}
