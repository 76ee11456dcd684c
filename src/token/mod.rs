//! Line access tokens: range-based edit capabilities.
//!
//! A token is proof that the client has read the specific lines it claims to
//! be editing: path, 1-based inclusive range, a checksum of the range text,
//! and the file's total line count at issue time. Tokens are immutable
//! values; every mutation produces new tokens.
//!
//! Storage per path is a map sorted by start line, so no two tokens on a
//! path share a start. Overlap on reissue follows the *replace* policy:
//! a new registration deletes any token it overlaps without fully covering,
//! and a fresh token is stored for exactly the requested range. Strict
//! per-range checksum semantics; the manager never widens a request, it only
//! *returns* a pre-existing wider token when one already covers the request.
//!
//! A path-alias graph carries tokens across renames so a client holding a
//! token issued before a move can still reach the current file.

pub mod wire;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NtsError, Result};
use crate::hashing;
use crate::model::types::ContentHash;

// ---------------------------------------------------------------------------
// LineAccessToken
// ---------------------------------------------------------------------------

/// A capability granting edits to `[start_line, end_line]` of `path` at a
/// specific content version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAccessToken {
    /// Absolute path the token was issued for.
    pub path: PathBuf,
    /// 1-based first line covered.
    pub start_line: u32,
    /// 1-based last line covered (inclusive, `>= start_line`).
    pub end_line: u32,
    /// Checksum of the exact range text at issue time.
    pub range_hash: ContentHash,
    /// The file's total line count at issue time.
    pub total_lines: u32,
}

impl LineAccessToken {
    /// Whether this token's range covers `[start, end]`.
    #[must_use]
    pub const fn covers(&self, start: u32, end: u32) -> bool {
        self.start_line <= start && self.end_line >= end
    }

    /// Whether this token's range intersects `[start, end]`.
    #[must_use]
    pub const fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start_line <= end && start <= self.end_line
    }

    /// The compact wire form (`LAT1.…`).
    #[must_use]
    pub fn encode(&self) -> String {
        wire::encode(self)
    }

    /// Parse the wire form.
    ///
    /// # Errors
    /// [`NtsError::TokenInvalidFormat`] when the string is not a valid
    /// token.
    pub fn decode(s: &str) -> Result<Self> {
        wire::decode(s)
    }
}

/// Outcome of validating a token against current file content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TokenValidation {
    /// The token authorizes the edit.
    Valid,
    /// The file's line count changed since issue.
    LineCountMismatch,
    /// The range text changed since issue.
    CrcMismatch,
    /// No live token covers the claimed range on that path.
    NotFound,
}

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TokenState {
    /// Tokens per path, keyed by start line.
    by_path: HashMap<PathBuf, BTreeMap<u32, LineAccessToken>>,
    /// Rename graph: old path → new path.
    aliases: HashMap<PathBuf, PathBuf>,
    /// Reverse rename edges: new path → old paths.
    reverse_aliases: HashMap<PathBuf, Vec<PathBuf>>,
}

/// Per-session registry of line access tokens.
#[derive(Default)]
pub struct TokenManager {
    inner: Mutex<TokenState>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    /// An empty token registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue (or reuse) a token covering `[start, end]` of `path`, where
    /// `range_text` is the exact text of that range and `total_lines` the
    /// file's current line count.
    ///
    /// A pre-existing token is returned unchanged when it exactly matches or
    /// already covers the request at the same line count; otherwise
    /// overlapping tokens are replaced.
    ///
    /// # Errors
    /// [`NtsError::TokenRangeMismatch`] on a malformed range.
    pub fn register_access(
        &self,
        path: &Path,
        start: u32,
        end: u32,
        range_text: &str,
        total_lines: u32,
    ) -> Result<LineAccessToken> {
        check_range(start, end)?;
        let hash = hashing::crc32_str(range_text);
        let mut state = self.lock();
        let tokens = state.by_path.entry(path.to_path_buf()).or_default();

        // Exact hit: reuse when fresh, discard when stale.
        if let Some(existing) = tokens.get(&start) {
            if existing.end_line == end && existing.total_lines == total_lines {
                if existing.range_hash == hash {
                    return Ok(existing.clone());
                }
                tokens.remove(&start);
            }
        }

        // Covering hit: a wider token at the same line count already grants
        // this range. Its hash is over its own range and is re-checked at
        // edit time.
        if let Some(covering) = tokens
            .values()
            .find(|t| t.total_lines == total_lines && t.covers(start, end))
        {
            return Ok(covering.clone());
        }

        // Replace policy: drop tokens the request absorbs or overlaps.
        let doomed: Vec<u32> = tokens
            .values()
            .filter(|t| t.total_lines == total_lines && t.overlaps(start, end))
            .map(|t| t.start_line)
            .collect();
        for key in doomed {
            tokens.remove(&key);
        }

        let token = LineAccessToken {
            path: path.to_path_buf(),
            start_line: start,
            end_line: end,
            range_hash: hash,
            total_lines,
        };
        tokens.insert(start, token.clone());
        debug!(path = %path.display(), start, end, total_lines, "issued token");
        Ok(token)
    }

    /// Validate `token` against the current text of its range and the file's
    /// current line count. Paths unlocked by an active transaction are
    /// short-circuited by the transaction layer before this runs.
    #[must_use]
    pub fn validate(
        &self,
        token: &LineAccessToken,
        current_range_text: &str,
        current_total_lines: u32,
    ) -> TokenValidation {
        if token.total_lines != current_total_lines {
            return TokenValidation::LineCountMismatch;
        }
        if hashing::crc32_str(current_range_text) != token.range_hash {
            return TokenValidation::CrcMismatch;
        }
        let state = self.lock();
        let Some(tokens) = state.by_path.get(&token.path) else {
            return TokenValidation::NotFound;
        };
        let covered = tokens.values().any(|t| {
            t.total_lines == token.total_lines && t.covers(token.start_line, token.end_line)
        });
        if covered {
            TokenValidation::Valid
        } else {
            TokenValidation::NotFound
        }
    }

    /// Translate every token on `path` across an edit at `after_line` that
    /// changed the file's line count by `delta`.
    pub fn shift_after_line(&self, path: &Path, after_line: u32, delta: i64, new_total: u32) {
        let mut state = self.lock();
        if let Some(tokens) = state.by_path.get_mut(path) {
            shift_partitioned(tokens, after_line, after_line, delta, new_total);
        }
    }

    /// Shift tokens around an edit of `[edit_start, edit_end]` with a net
    /// line delta, then issue a fresh token covering the replacement range.
    ///
    /// # Errors
    /// [`NtsError::TokenRangeMismatch`] on a malformed edit range.
    pub fn update_after_edit(
        &self,
        path: &Path,
        edit_start: u32,
        edit_end: u32,
        line_delta: i64,
        new_range_text: &str,
        new_total: u32,
    ) -> Result<LineAccessToken> {
        check_range(edit_start, edit_end)?;
        let shifted_end = i64::from(edit_end) + line_delta;
        let new_end = u32::try_from(shifted_end.max(i64::from(edit_start))).unwrap_or(edit_start);
        let token = LineAccessToken {
            path: path.to_path_buf(),
            start_line: edit_start,
            end_line: new_end,
            range_hash: hashing::crc32_str(new_range_text),
            total_lines: new_total,
        };

        let mut state = self.lock();
        let tokens = state.by_path.entry(path.to_path_buf()).or_default();
        shift_partitioned(tokens, edit_start, edit_end, line_delta, new_total);
        // The editor has fresh knowledge of exactly this range: replace
        // anything it overlaps rather than reusing a now-stale wider token.
        let doomed: Vec<u32> = tokens
            .values()
            .filter(|t| t.total_lines == new_total && t.overlaps(edit_start, new_end))
            .map(|t| t.start_line)
            .collect();
        for key in doomed {
            tokens.remove(&key);
        }
        tokens.insert(edit_start, token.clone());
        debug!(path = %path.display(), edit_start, edit_end, line_delta, "token refreshed after edit");
        Ok(token)
    }

    /// Transplant every token from `old_path` to `new_path` after a rename,
    /// preserving ranges and hashes, and record the alias edge.
    pub fn move_tokens(&self, old_path: &Path, new_path: &Path) {
        let mut state = self.lock();
        if let Some(tokens) = state.by_path.remove(old_path) {
            let rekeyed: BTreeMap<u32, LineAccessToken> = tokens
                .into_iter()
                .map(|(start, mut token)| {
                    token.path = new_path.to_path_buf();
                    (start, token)
                })
                .collect();
            state.by_path.insert(new_path.to_path_buf(), rekeyed);
        }
        state
            .aliases
            .insert(old_path.to_path_buf(), new_path.to_path_buf());
        state
            .reverse_aliases
            .entry(new_path.to_path_buf())
            .or_default()
            .push(old_path.to_path_buf());
        debug!(from = %old_path.display(), to = %new_path.display(), "moved tokens");
    }

    /// Follow the alias chain from `path` to the current path, guarding
    /// against cycles.
    #[must_use]
    pub fn resolve_current_path(&self, path: &Path) -> PathBuf {
        let state = self.lock();
        let mut seen: HashSet<&Path> = HashSet::new();
        let mut current: &Path = path;
        while let Some(next) = state.aliases.get(current) {
            if !seen.insert(current) {
                break;
            }
            current = next.as_path();
        }
        current.to_path_buf()
    }

    /// Transitive closure of reverse aliases: every path that once named the
    /// file now at `path`.
    #[must_use]
    pub fn previous_paths(&self, path: &Path) -> Vec<PathBuf> {
        let state = self.lock();
        let mut out: Vec<PathBuf> = Vec::new();
        let mut queue: Vec<&Path> = vec![path];
        let mut seen: HashSet<&Path> = HashSet::new();
        while let Some(current) = queue.pop() {
            if let Some(olds) = state.reverse_aliases.get(current) {
                for old in olds {
                    if seen.insert(old.as_path()) {
                        out.push(old.clone());
                        queue.push(old.as_path());
                    }
                }
            }
        }
        out.sort();
        out
    }

    /// Drop every token on a path (undo/redo invalidate reads wholesale).
    pub fn clear_path(&self, path: &Path) {
        self.lock().by_path.remove(path);
    }

    /// Snapshot of the tokens on a path, ordered by start line.
    #[must_use]
    pub fn tokens_for(&self, path: &Path) -> Vec<LineAccessToken> {
        self.lock()
            .by_path
            .get(path)
            .map(|tokens| tokens.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn check_range(start: u32, end: u32) -> Result<()> {
    if start == 0 {
        return Err(NtsError::TokenRangeMismatch {
            start,
            end,
            reason: "line numbers are 1-based".to_owned(),
        });
    }
    if end < start {
        return Err(NtsError::TokenRangeMismatch {
            start,
            end,
            reason: "range end precedes start".to_owned(),
        });
    }
    Ok(())
}

/// Shift every token in `tokens` around an edit of `[edit_start, edit_end]`.
///
/// Tokens entirely below the edit keep their position (content above the
/// edit is unchanged, so hashes are retained). Tokens entirely above shift
/// by `delta` and keep their hashes; tokens pushed to or below line zero are
/// dropped. A straddling token is dropped, unless the edit grew the file and
/// the token fully contains the edited range, in which case its end expands
/// by `delta` and the stale hash is left to fail the next validation,
/// forcing a re-read.
fn shift_partitioned(
    tokens: &mut BTreeMap<u32, LineAccessToken>,
    edit_start: u32,
    edit_end: u32,
    delta: i64,
    new_total: u32,
) {
    let old: Vec<LineAccessToken> = std::mem::take(tokens).into_values().collect();
    for mut token in old {
        if token.end_line < edit_start {
            token.total_lines = new_total;
            insert_if_free(tokens, token);
        } else if token.start_line > edit_end {
            let new_start = i64::from(token.start_line) + delta;
            let new_end = i64::from(token.end_line) + delta;
            if new_start >= 1 && new_end >= 1 {
                token.start_line = u32::try_from(new_start).unwrap_or(u32::MAX);
                token.end_line = u32::try_from(new_end).unwrap_or(u32::MAX);
                token.total_lines = new_total;
                insert_if_free(tokens, token);
            }
        } else if delta > 0 && token.start_line <= edit_start && token.end_line >= edit_end {
            token.end_line = u32::try_from(i64::from(token.end_line) + delta).unwrap_or(u32::MAX);
            token.total_lines = new_total;
            insert_if_free(tokens, token);
        }
        // other straddlers are dropped
    }
}

/// Insert a shifted token unless it now collides with one already kept: a
/// shrinking edit can slide a token into the range of one below it, and
/// tokens issued at different line counts normalize to the same count after
/// a shift. First kept wins; the dropped token's range must be re-read.
fn insert_if_free(tokens: &mut BTreeMap<u32, LineAccessToken>, token: LineAccessToken) {
    let collides = tokens.values().any(|t| {
        t.total_lines == token.total_lines && t.overlaps(token.start_line, token.end_line)
    });
    if !collides {
        tokens.insert(token.start_line, token);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
