//! File lineage: stable identity across moves, renames, and relocations.
//!
//! Per-session index mapping a stable [`FileId`] to its current path through
//! a history of moves, plus a content-hash reverse index used to recover
//! "lost" files whose on-disk location changed behind the session's back.
//!
//! Three maps, guarded by a single lock: `by_id`, `by_path`, and `by_hash`.
//! `by_id` and `by_path` are kept strictly consistent; `by_hash` may lag
//! until [`update_content_hash`](FileLineageTracker::update_content_hash)
//! runs after an edit.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::hashing;
use crate::model::types::{ContentHash, FileId};
use crate::sandbox::PathSandbox;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One recorded relocation of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    /// Where the file was before the move.
    pub old_path: PathBuf,
    /// Where the file moved to.
    pub new_path: PathBuf,
    /// When the move was recorded.
    pub moved_at: DateTime<Utc>,
}

/// The lineage of one tracked file.
#[derive(Clone, Debug, Serialize)]
pub struct FileLineageRecord {
    /// Stable identity, assigned at first registration.
    pub file_id: FileId,
    /// The path the file currently lives at, as far as the session knows.
    pub current_path: PathBuf,
    /// Checksum of the content as last observed.
    pub last_known_hash: ContentHash,
    /// Ordered history of recorded moves.
    pub move_history: Vec<MoveRecord>,
}

#[derive(Default)]
struct LineageIndex {
    by_id: HashMap<FileId, FileLineageRecord>,
    by_path: HashMap<PathBuf, FileId>,
    by_hash: HashMap<ContentHash, HashSet<FileId>>,
}

// ---------------------------------------------------------------------------
// FileLineageTracker
// ---------------------------------------------------------------------------

/// Per-session lineage index.
pub struct FileLineageTracker {
    inner: Mutex<LineageIndex>,
    sandbox: Arc<PathSandbox>,
}

impl std::fmt::Debug for FileLineageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLineageTracker").finish_non_exhaustive()
    }
}

impl FileLineageTracker {
    /// An empty tracker bound to a sandbox (used for protected-name skips
    /// during deep search).
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self {
            inner: Mutex::new(LineageIndex::default()),
            sandbox,
        }
    }

    /// Register a path, assigning a fresh [`FileId`] on first sight.
    /// Idempotent: a known path returns its existing ID.
    pub fn register_file(&self, path: &Path) -> FileId {
        let mut guard = self.lock();
        let index = &mut *guard;
        if let Some(id) = index.by_path.get(path) {
            return *id;
        }
        let id = FileId::generate();
        let hash = hashing::hash_file_or_zero(path);
        index.by_path.insert(path.to_path_buf(), id);
        index.by_hash.entry(hash).or_default().insert(id);
        index.by_id.insert(
            id,
            FileLineageRecord {
                file_id: id,
                current_path: path.to_path_buf(),
                last_known_hash: hash,
                move_history: Vec::new(),
            },
        );
        debug!(file_id = %id, path = %path.display(), "registered file");
        id
    }

    /// Record a move from `old_path` to `new_path`, re-keying the path index
    /// and appending to the file's history. An unknown `old_path` first
    /// registers the file (under its old path, so the move lands in its
    /// history).
    pub fn record_move(&self, old_path: &Path, new_path: &Path) -> FileId {
        let id = match self.file_id(old_path) {
            Some(id) => id,
            None => self.register_file(old_path),
        };
        let mut guard = self.lock();
        let index = &mut *guard;
        index.by_path.remove(old_path);
        index.by_path.insert(new_path.to_path_buf(), id);
        if let Some(record) = index.by_id.get_mut(&id) {
            record.current_path = new_path.to_path_buf();
            record.move_history.push(MoveRecord {
                old_path: old_path.to_path_buf(),
                new_path: new_path.to_path_buf(),
                moved_at: Utc::now(),
            });
        }
        debug!(file_id = %id, from = %old_path.display(), to = %new_path.display(), "recorded move");
        id
    }

    /// Re-hash a file after an edit, atomically moving its ID between hash
    /// buckets.
    pub fn update_content_hash(&self, path: &Path) {
        let Some(id) = self.file_id(path) else { return };
        let new_hash = hashing::hash_file_or_zero(path);
        let mut guard = self.lock();
        let index = &mut *guard;
        let Some(record) = index.by_id.get_mut(&id) else {
            return;
        };
        let old_hash = record.last_known_hash;
        if old_hash == new_hash {
            return;
        }
        record.last_known_hash = new_hash;
        let emptied = index.by_hash.get_mut(&old_hash).map(|bucket| {
            bucket.remove(&id);
            bucket.is_empty()
        });
        if emptied == Some(true) {
            index.by_hash.remove(&old_hash);
        }
        index.by_hash.entry(new_hash).or_default().insert(id);
    }

    /// Drop every index entry for a path.
    pub fn unregister(&self, path: &Path) {
        let mut guard = self.lock();
        let index = &mut *guard;
        let Some(id) = index.by_path.remove(path) else {
            return;
        };
        if let Some(record) = index.by_id.remove(&id) {
            let emptied = index.by_hash.get_mut(&record.last_known_hash).map(|bucket| {
                bucket.remove(&id);
                bucket.is_empty()
            });
            if emptied == Some(true) {
                index.by_hash.remove(&record.last_known_hash);
            }
        }
    }

    // -- lookups ------------------------------------------------------------

    /// The current path of a file identity.
    #[must_use]
    pub fn current_path(&self, id: FileId) -> Option<PathBuf> {
        self.lock().by_id.get(&id).map(|r| r.current_path.clone())
    }

    /// The identity registered at a path, if any.
    #[must_use]
    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        self.lock().by_path.get(path).copied()
    }

    /// The move history of a file identity.
    #[must_use]
    pub fn move_history(&self, id: FileId) -> Vec<MoveRecord> {
        self.lock()
            .by_id
            .get(&id)
            .map(|r| r.move_history.clone())
            .unwrap_or_default()
    }

    /// The full lineage record for a path.
    #[must_use]
    pub fn record_for_path(&self, path: &Path) -> Option<FileLineageRecord> {
        let index = self.lock();
        let id = index.by_path.get(path)?;
        index.by_id.get(id).cloned()
    }

    /// Where a file that once lived at `path` lives now, walking move
    /// histories when the path index no longer knows the old name.
    #[must_use]
    pub fn resolve_moved_path(&self, path: &Path) -> Option<(FileId, PathBuf)> {
        let index = self.lock();
        if let Some(id) = index.by_path.get(path) {
            return index
                .by_id
                .get(id)
                .map(|r| (*id, r.current_path.clone()));
        }
        index
            .by_id
            .values()
            .find(|record| record.move_history.iter().any(|m| m.old_path == path))
            .map(|record| (record.file_id, record.current_path.clone()))
    }

    /// Currently-existing paths of all files whose last-known hash matches.
    #[must_use]
    pub fn find_by_content_hash(&self, hash: ContentHash) -> Vec<PathBuf> {
        let index = self.lock();
        let Some(bucket) = index.by_hash.get(&hash) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = bucket
            .iter()
            .filter_map(|id| index.by_id.get(id))
            .map(|r| r.current_path.clone())
            .filter(|p| p.exists())
            .collect();
        paths.sort();
        paths
    }

    /// Walk the filesystem from `root` looking for a regular file whose
    /// content hashes to `expected`, skipping protected paths, until a match
    /// is found or `max_files` files have been hashed.
    #[must_use]
    pub fn deep_search_by_content_hash(
        &self,
        expected: ContentHash,
        root: &Path,
        max_files: usize,
    ) -> Option<PathBuf> {
        let mut scanned = 0_usize;
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if self.sandbox.is_protected(&path) {
                    continue;
                }
                let Ok(kind) = entry.file_type() else { continue };
                if kind.is_dir() {
                    stack.push(path);
                } else if kind.is_file() {
                    if scanned >= max_files {
                        debug!(max_files, "deep search budget exhausted");
                        return None;
                    }
                    scanned += 1;
                    if hashing::hash_file_or_zero(&path) == expected {
                        return Some(path);
                    }
                }
            }
        }
        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LineageIndex> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
