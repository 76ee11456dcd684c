//! External change detection cache.
//!
//! Per-session map of the last content each tracked file was *observed* to
//! have through the tool surface. Between tool calls the hosting layer asks
//! [`ExternalChangeTracker::observe`] whether a file drifted; a drift (a
//! human saving the file in their editor, a formatter, a git checkout)
//! yields the cached previous content so the transaction manager can
//! journal it as an external entry.
//!
//! Undo and redo call [`remove_snapshot`](ExternalChangeTracker::remove_snapshot)
//! for every path they rewrite, so a restore is not re-detected as yet
//! another external change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::hashing;
use crate::model::types::ContentHash;

/// A detected out-of-session modification.
#[derive(Clone, Debug)]
pub struct ExternalChange {
    /// The file that drifted.
    pub path: PathBuf,
    /// Content as last observed through the tool surface.
    pub previous_text: String,
    /// Checksum of `previous_text`.
    pub previous_hash: ContentHash,
    /// Checksum of the content now on disk.
    pub current_hash: ContentHash,
}

#[derive(Clone)]
struct Observed {
    text: String,
    hash: ContentHash,
}

/// Per-session cache of last-observed file contents.
#[derive(Default)]
pub struct ExternalChangeTracker {
    observed: Mutex<HashMap<PathBuf, Observed>>,
}

impl std::fmt::Debug for ExternalChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalChangeTracker").finish_non_exhaustive()
    }
}

impl ExternalChangeTracker {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the content currently on disk as the observed state of `path`
    /// (called after reads and after commits).
    pub fn snapshot(&self, path: &Path) {
        if let Ok(text) = std::fs::read_to_string(path) {
            let hash = hashing::crc32_str(&text);
            self.lock()
                .insert(path.to_path_buf(), Observed { text, hash });
        }
    }

    /// Compare the on-disk content of `path` against the cache. A drift
    /// returns the change (and re-seeds the cache with the new content so
    /// the same drift is reported once).
    #[must_use]
    pub fn observe(&self, path: &Path) -> Option<ExternalChange> {
        let current_text = std::fs::read_to_string(path).ok()?;
        let current_hash = hashing::crc32_str(&current_text);
        let mut observed = self.lock();
        let previous = observed.get(path)?.clone();
        if previous.hash == current_hash {
            return None;
        }
        observed.insert(
            path.to_path_buf(),
            Observed {
                text: current_text,
                hash: current_hash,
            },
        );
        Some(ExternalChange {
            path: path.to_path_buf(),
            previous_text: previous.text,
            previous_hash: previous.hash,
            current_hash,
        })
    }

    /// The cached hash of a path, if one is held.
    #[must_use]
    pub fn observed_hash(&self, path: &Path) -> Option<ContentHash> {
        self.lock().get(path).map(|o| o.hash)
    }

    /// Forget a path (called by undo/redo after rewriting it).
    pub fn remove_snapshot(&self, path: &Path) {
        self.lock().remove(path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Observed>> {
        self.observed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
