//! Smart-undo engine.
//!
//! Undoing a transaction entry means putting every snapshotted file back to
//! its pre-transaction bytes — at wherever the file lives *now*. The engine
//! first computes a restore plan over the entry's snapshots, resolving each
//! original path in order: in place, through the lineage tracker, then by a
//! bounded content-hash search under the sandbox root. Only when every file
//! has a resolution (or an explainable reason it has none) does it write.
//!
//! A file with no resolution at all aborts the plan before any write: the
//! entry is left on the undo stack marked stuck rather than half-restored.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::external::ExternalChangeTracker;
use crate::hashing;
use crate::journal::{EntryKind, FileSnapshot, JournalEntry, JournalStore, Stack};
use crate::lineage::FileLineageTracker;
use crate::sandbox::PathSandbox;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How one file fared in a restore plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FileOutcome {
    /// Pre-content rewritten at the original path.
    Restored,
    /// Pre-content rewritten at the file's current (moved) location.
    Relocated {
        /// Where the file lives now.
        to: PathBuf,
    },
    /// A later transaction on the undo stack deleted this file; it must be
    /// undone first.
    DeletedDownstream,
    /// Unrelated edits landed at the target after the transaction; the file
    /// was left alone.
    Skipped {
        /// Why the file was skipped.
        reason: String,
    },
    /// No path and no content-hash match resolved the file.
    NotFound,
}

/// Per-file restore result.
#[derive(Clone, Debug, Serialize)]
pub struct FileRestore {
    /// The path the snapshot was taken at.
    pub original_path: PathBuf,
    /// What happened to it.
    pub outcome: FileOutcome,
}

/// Aggregate outcome of an undo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UndoOutcome {
    /// Every file restored at its original path.
    Success,
    /// Every restored file had moved; all were restored at their current
    /// locations.
    ResolvedMove,
    /// A mix of in-place and relocated restores.
    MergedUndo,
    /// Some files were skipped over unrelated changes.
    Partial,
    /// A downstream deletion blocks part of the restore.
    Orphaned,
    /// Nothing could be restored; the entry stays on the stack.
    Stuck,
    /// Nothing could be restored, but the workspace is a git work tree and
    /// the hint names a recovery command.
    GitFallback,
    /// The undo stack was empty.
    NothingToUndo,
}

/// Structured result of an undo or redo.
#[derive(Clone, Debug, Serialize)]
pub struct UndoReport {
    /// Aggregate outcome.
    pub outcome: UndoOutcome,
    /// Per-file details, in snapshot order.
    pub files: Vec<FileRestore>,
    /// A recovery command, when one is known.
    pub recovery_hint: Option<String>,
    /// Description of the entry that was (or could not be) undone.
    pub description: Option<String>,
}

impl UndoReport {
    pub(crate) fn empty(outcome: UndoOutcome, description: Option<String>) -> Self {
        Self {
            outcome,
            files: Vec::new(),
            recovery_hint: None,
            description,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(crate) struct RestoreContext<'a> {
    pub lineage: &'a FileLineageTracker,
    pub external: &'a ExternalChangeTracker,
    pub sandbox: &'a PathSandbox,
    pub store: &'a JournalStore,
    pub deep_search_max_files: usize,
}

enum Resolution {
    /// Write `pre` at `target` (delete when `pre` is `None`).
    Write { target: PathBuf, relocated: bool },
    DeletedDownstream,
    Skipped(String),
    NotFound,
}

impl RestoreContext<'_> {
    /// Undo a `TRANSACTION` entry. On anything but [`UndoOutcome::Stuck`] /
    /// [`UndoOutcome::GitFallback`], the returned snapshots capture the
    /// pre-restore state of every path written, keyed by the path that was
    /// written — exactly what a redo entry needs.
    pub fn restore_transaction(
        &self,
        entry: &JournalEntry,
        snapshots: &[FileSnapshot],
    ) -> Result<(UndoReport, Vec<FileSnapshot>)> {
        debug_assert_eq!(entry.kind, EntryKind::Transaction);

        // Plan phase: resolve every file before touching the disk.
        let mut plan: Vec<(FileSnapshot, Resolution)> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let resolution = self.resolve(entry, snapshot)?;
            plan.push((snapshot.clone(), resolution));
        }

        if plan
            .iter()
            .any(|(_, r)| matches!(r, Resolution::NotFound))
        {
            return Ok((self.stuck_report(entry, &plan), Vec::new()));
        }

        // Execute phase.
        let mut files = Vec::with_capacity(plan.len());
        let mut redo_snapshots = Vec::new();
        for (snapshot, resolution) in plan {
            let original = self.sandbox.absolutize(&snapshot.file_path);
            match resolution {
                Resolution::Write { target, relocated } => {
                    let current = read_bytes_if_exists(&target)?;
                    write_restore(
                        &target,
                        snapshot.content.as_deref(),
                        self.sandbox,
                    )?;
                    redo_snapshots
                        .push(FileSnapshot::of(self.sandbox.relativize(&target), current));
                    files.push(FileRestore {
                        original_path: original,
                        outcome: if relocated {
                            FileOutcome::Relocated { to: target }
                        } else {
                            FileOutcome::Restored
                        },
                    });
                }
                Resolution::DeletedDownstream => files.push(FileRestore {
                    original_path: original,
                    outcome: FileOutcome::DeletedDownstream,
                }),
                Resolution::Skipped(reason) => files.push(FileRestore {
                    original_path: original,
                    outcome: FileOutcome::Skipped { reason },
                }),
                Resolution::NotFound => unreachable!("not-found plans abort before execution"),
            }
        }

        let outcome = aggregate(&files);
        debug!(?outcome, files = files.len(), "smart undo executed");
        Ok((
            UndoReport {
                outcome,
                files,
                recovery_hint: None,
                description: entry.description.clone(),
            },
            redo_snapshots,
        ))
    }

    fn resolve(&self, entry: &JournalEntry, snapshot: &FileSnapshot) -> Result<Resolution> {
        let path = self.sandbox.absolutize(&snapshot.file_path);
        let post_hash = self.post_commit_hash(entry.id, &snapshot.file_path)?;

        if path.exists() {
            // The transaction created this file (no pre-content): undoing it
            // deletes whatever stands at the path today only when that
            // content is still the transaction's own.
            let current = hashing::hash_file_or_zero(&path);
            let clean = post_hash == Some(current)
                || snapshot.hash == current
                || self.external.observed_hash(&path) == Some(current)
                || self
                    .lineage
                    .record_for_path(&path)
                    .is_some_and(|r| r.last_known_hash == current);
            if clean {
                return Ok(Resolution::Write {
                    target: path,
                    relocated: false,
                });
            }
            return Ok(Resolution::Skipped(
                "unrelated changes at the target since this transaction".to_owned(),
            ));
        }

        // Original path gone. A created-and-already-deleted file needs no
        // work; report it restored-in-place (the delete is a no-op).
        if snapshot.content.is_none() {
            return Ok(Resolution::Write {
                target: path,
                relocated: false,
            });
        }

        // Lineage: the file may simply live elsewhere now.
        let tracked = self.lineage.resolve_moved_path(&path);
        if let Some((_, current_path)) = &tracked {
            if *current_path != path && current_path.exists() {
                return Ok(Resolution::Write {
                    target: current_path.clone(),
                    relocated: true,
                });
            }
        }

        // Content-hash search: find where the post-commit bytes went.
        let needle = post_hash.unwrap_or(snapshot.hash);
        if let Some(root) = self.sandbox.primary_root() {
            for hash in [needle, snapshot.hash] {
                if hash.is_zero() {
                    continue;
                }
                if let Some(found) =
                    self.lineage
                        .deep_search_by_content_hash(hash, &root, self.deep_search_max_files)
                {
                    return Ok(Resolution::Write {
                        target: found,
                        relocated: true,
                    });
                }
            }
        }

        // Deleted by a later transaction still on the stack?
        if self.deleted_downstream(entry, &snapshot.file_path)? {
            return Ok(Resolution::DeletedDownstream);
        }

        // The session tracked this file and every known location of it is
        // gone: undoing means recreating it at the original path.
        if tracked.is_some() {
            return Ok(Resolution::Write {
                target: path,
                relocated: false,
            });
        }

        Ok(Resolution::NotFound)
    }

    /// The post-commit checksum recorded for a path at commit time.
    fn post_commit_hash(
        &self,
        entry_id: i64,
        stored_path: &Path,
    ) -> Result<Option<crate::model::types::ContentHash>> {
        let key = post_crc_key(entry_id, stored_path);
        Ok(self
            .store
            .meta(&key)?
            .and_then(|hex| crate::model::types::ContentHash::from_hex(&hex).ok()))
    }

    fn deleted_downstream(&self, entry: &JournalEntry, stored_path: &Path) -> Result<bool> {
        for later in self.store.entries(Stack::Undo)? {
            if later.position <= entry.position || later.kind != EntryKind::Transaction {
                continue;
            }
            let touches = self
                .store
                .snapshots(later.id)?
                .iter()
                .any(|s| s.file_path == stored_path);
            if touches {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn stuck_report(
        &self,
        entry: &JournalEntry,
        plan: &[(FileSnapshot, Resolution)],
    ) -> UndoReport {
        let files: Vec<FileRestore> = plan
            .iter()
            .map(|(snapshot, resolution)| FileRestore {
                original_path: self.sandbox.absolutize(&snapshot.file_path),
                outcome: match resolution {
                    Resolution::NotFound => FileOutcome::NotFound,
                    Resolution::DeletedDownstream => FileOutcome::DeletedDownstream,
                    Resolution::Skipped(reason) => FileOutcome::Skipped {
                        reason: reason.clone(),
                    },
                    Resolution::Write { target, relocated } => {
                        if *relocated {
                            FileOutcome::Relocated { to: target.clone() }
                        } else {
                            FileOutcome::Restored
                        }
                    }
                },
            })
            .collect();

        let git_work_tree = self
            .sandbox
            .primary_root()
            .is_some_and(|root| root.join(".git").exists());
        let (outcome, recovery_hint) = if git_work_tree {
            let lost: Vec<String> = files
                .iter()
                .filter(|f| f.outcome == FileOutcome::NotFound)
                .map(|f| f.original_path.display().to_string())
                .collect();
            (
                UndoOutcome::GitFallback,
                Some(format!("git checkout -- {}", lost.join(" "))),
            )
        } else {
            (UndoOutcome::Stuck, None)
        };
        warn!(?outcome, "smart undo could not resolve every file; nothing was written");
        UndoReport {
            outcome,
            files,
            recovery_hint,
            description: entry.description.clone(),
        }
    }
}

/// Metadata key holding the post-commit checksum of one path of one entry.
pub(crate) fn post_crc_key(entry_id: i64, stored_path: &Path) -> String {
    format!("post_crc:{entry_id}:{}", stored_path.display())
}

fn aggregate(files: &[FileRestore]) -> UndoOutcome {
    let mut restored = 0_usize;
    let mut relocated = 0_usize;
    let mut skipped = 0_usize;
    let mut orphaned = 0_usize;
    for file in files {
        match file.outcome {
            FileOutcome::Restored => restored += 1,
            FileOutcome::Relocated { .. } => relocated += 1,
            FileOutcome::Skipped { .. } => skipped += 1,
            FileOutcome::DeletedDownstream => orphaned += 1,
            FileOutcome::NotFound => return UndoOutcome::Stuck,
        }
    }
    if orphaned > 0 {
        UndoOutcome::Orphaned
    } else if skipped > 0 {
        UndoOutcome::Partial
    } else if relocated > 0 && restored > 0 {
        UndoOutcome::MergedUndo
    } else if relocated > 0 {
        UndoOutcome::ResolvedMove
    } else {
        UndoOutcome::Success
    }
}

fn read_bytes_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write pre-content at a path, or delete the path (pruning now-empty
/// ancestor directories up to the nearest sandbox root) when the
/// pre-content is "did not exist".
pub(crate) fn write_restore(
    path: &Path,
    pre_content: Option<&[u8]>,
    sandbox: &PathSandbox,
) -> Result<()> {
    match pre_content {
        Some(bytes) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
        }
        None => {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            prune_empty_ancestors(path, sandbox);
        }
    }
    Ok(())
}

fn prune_empty_ancestors(path: &Path, sandbox: &PathSandbox) {
    let roots = sandbox.roots();
    let mut current = path.parent();
    while let Some(dir) = current {
        if roots.iter().any(|root| dir == root) {
            break;
        }
        let empty = std::fs::read_dir(dir).map(|mut it| it.next().is_none());
        match empty {
            Ok(true) => {
                if std::fs::remove_dir(dir).is_err() {
                    break;
                }
            }
            _ => break,
        }
        current = dir.parent();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
