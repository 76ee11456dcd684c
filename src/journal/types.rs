//! Journal record types.
//!
//! A journal entry lives on one of two stacks (`UNDO`, `REDO`), totally
//! ordered by `position` within its stack. Transaction entries carry child
//! rows: whole-file pre-content snapshots and per-file diff statistics.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::diff::DiffStat;
use crate::model::types::ContentHash;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which stack an entry lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stack {
    /// History that `undo` consumes.
    Undo,
    /// History that `redo` consumes; cleared by every new commit.
    Redo,
}

impl Stack {
    /// Stable storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Undo => "UNDO",
            Self::Redo => "REDO",
        }
    }

    /// Parse the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNDO" => Some(Self::Undo),
            "REDO" => Some(Self::Redo),
            _ => None,
        }
    }
}

/// What kind of event an entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    /// A committed transaction with snapshots and diffs.
    Transaction,
    /// A named marker with no snapshots.
    Checkpoint,
    /// A change made outside the session, detected by hash comparison.
    External,
}

impl EntryKind {
    /// Stable storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "TRANSACTION",
            Self::Checkpoint => "CHECKPOINT",
            Self::External => "EXTERNAL",
        }
    }

    /// Parse the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSACTION" => Some(Self::Transaction),
            "CHECKPOINT" => Some(Self::Checkpoint),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }
}

/// Whether an entry is cleanly undoable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    /// Normal state.
    Committed,
    /// A smart undo failed against this entry; it stays on the stack.
    Stuck,
}

impl EntryStatus {
    /// Stable storage form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "COMMITTED",
            Self::Stuck => "STUCK",
        }
    }

    /// Parse the storage form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMMITTED" => Some(Self::Committed),
            "STUCK" => Some(Self::Stuck),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A stored journal entry.
#[derive(Clone, Debug, Serialize)]
pub struct JournalEntry {
    /// Row ID, stable for the lifetime of the entry.
    pub id: i64,
    /// Which stack the entry lives on.
    pub stack: Stack,
    /// What the entry records.
    pub kind: EntryKind,
    /// Total order within the stack.
    pub position: i64,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Human-readable description (transaction summary).
    pub description: Option<String>,
    /// Undoability state.
    pub status: EntryStatus,
    /// The user instruction that triggered the transaction, if recorded.
    pub instruction: Option<String>,
    /// For external entries: the path that changed.
    pub affected_path: Option<PathBuf>,
    /// For external entries: checksum before the change.
    pub previous_hash: Option<ContentHash>,
    /// For external entries: checksum after the change.
    pub current_hash: Option<ContentHash>,
    /// For checkpoint entries: the checkpoint name.
    pub checkpoint_name: Option<String>,
}

/// Fields of an entry to be appended (ID and position are assigned by the
/// store).
#[derive(Clone, Debug, Default)]
pub struct NewEntry {
    pub kind: Option<EntryKind>,
    pub description: Option<String>,
    pub status: Option<EntryStatus>,
    pub instruction: Option<String>,
    pub affected_path: Option<PathBuf>,
    pub previous_hash: Option<ContentHash>,
    pub current_hash: Option<ContentHash>,
    pub checkpoint_name: Option<String>,
}

impl NewEntry {
    /// A transaction entry with a description.
    #[must_use]
    pub fn transaction(description: &str, instruction: Option<&str>) -> Self {
        Self {
            kind: Some(EntryKind::Transaction),
            description: Some(description.to_owned()),
            instruction: instruction.map(str::to_owned),
            ..Self::default()
        }
    }

    /// A named checkpoint entry.
    #[must_use]
    pub fn checkpoint(name: &str) -> Self {
        Self {
            kind: Some(EntryKind::Checkpoint),
            checkpoint_name: Some(name.to_owned()),
            ..Self::default()
        }
    }

    /// An external-change entry.
    #[must_use]
    pub fn external(
        path: PathBuf,
        previous_hash: ContentHash,
        current_hash: ContentHash,
        description: &str,
    ) -> Self {
        Self {
            kind: Some(EntryKind::External),
            description: Some(description.to_owned()),
            affected_path: Some(path),
            previous_hash: Some(previous_hash),
            current_hash: Some(current_hash),
            ..Self::default()
        }
    }

    pub(crate) fn kind(&self) -> EntryKind {
        self.kind.unwrap_or(EntryKind::Transaction)
    }

    pub(crate) fn status(&self) -> EntryStatus {
        self.status.unwrap_or(EntryStatus::Committed)
    }
}

/// Whole-file pre-content snapshot attached to an entry. `content: None`
/// records "the file did not exist".
#[derive(Clone, Debug)]
pub struct FileSnapshot {
    /// Path, relative to the primary root when possible.
    pub file_path: PathBuf,
    /// The file's bytes, or `None` for "did not exist".
    pub content: Option<Vec<u8>>,
    /// Size of `content` in bytes (zero for absent files).
    pub file_size: u64,
    /// Checksum of `content` ([`ContentHash::ZERO`] for absent files).
    pub hash: ContentHash,
}

impl FileSnapshot {
    /// Snapshot of existing content.
    #[must_use]
    pub fn of(file_path: PathBuf, content: Option<Vec<u8>>) -> Self {
        let (file_size, hash) = content.as_ref().map_or((0, ContentHash::ZERO), |bytes| {
            (bytes.len() as u64, crate::hashing::crc32(bytes))
        });
        Self {
            file_path,
            content,
            file_size,
            hash,
        }
    }
}

/// Per-file diff statistics attached to an entry.
#[derive(Clone, Debug, Serialize)]
pub struct DiffStatRow {
    /// Path, relative to the primary root when possible.
    pub file_path: PathBuf,
    /// The statistics.
    pub stat: DiffStat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_and_kind_round_trip_their_storage_forms() {
        for stack in [Stack::Undo, Stack::Redo] {
            assert_eq!(Stack::parse(stack.as_str()), Some(stack));
        }
        for kind in [EntryKind::Transaction, EntryKind::Checkpoint, EntryKind::External] {
            assert_eq!(EntryKind::parse(kind.as_str()), Some(kind));
        }
        for status in [EntryStatus::Committed, EntryStatus::Stuck] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Stack::parse("SIDEWAYS"), None);
    }

    #[test]
    fn snapshot_of_absent_file_is_zero_sized() {
        let snap = FileSnapshot::of(PathBuf::from("gone.txt"), None);
        assert_eq!(snap.file_size, 0);
        assert!(snap.hash.is_zero());
        assert!(snap.content.is_none());
    }

    #[test]
    fn snapshot_of_content_records_size_and_hash() {
        let snap = FileSnapshot::of(PathBuf::from("a.txt"), Some(b"hello".to_vec()));
        assert_eq!(snap.file_size, 5);
        assert_eq!(snap.hash, crate::hashing::crc32(b"hello"));
    }
}
