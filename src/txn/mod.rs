//! Transaction manager: thread-scoped grouping of file mutations with
//! atomic commit/rollback, an undo/redo journal, external-change records,
//! and checkpoints.
//!
//! A transaction is bound to the thread that began it. Nesting is a counter:
//! inner commits are no-ops and only the outermost commit writes a journal
//! entry. Rollback at any level aborts the whole transaction immediately.
//!
//! Tools call [`backup`](TransactionManager::backup) before every mutation;
//! the first backup of a path inside a transaction captures the bytes that
//! undo will restore. Skipping it voids undo for that file.

pub mod restore;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{NtsError, Result};
use crate::external::ExternalChangeTracker;
use crate::hashing;
use crate::journal::types::DiffStatRow;
use crate::journal::{EntryKind, EntryStatus, FileSnapshot, JournalEntry, JournalStore, NewEntry, Stack};
use crate::lineage::FileLineageTracker;
use crate::model::diff::compute_diff_stat;
use crate::model::types::{ContentHash, SessionId};
use crate::sandbox::PathSandbox;
use crate::token::{LineAccessToken, TokenManager, TokenValidation};

use restore::{RestoreContext, UndoOutcome, UndoReport, post_crc_key, write_restore};

/// Resource limits threaded into the manager from configuration.
#[derive(Clone, Copy, Debug)]
pub struct TxnLimits {
    /// Cap on each journal stack's length.
    pub journal_cap: usize,
    /// Bound on files hashed during a lost-file deep search.
    pub deep_search_max_files: usize,
}

impl Default for TxnLimits {
    fn default() -> Self {
        Self {
            journal_cap: crate::config::DEFAULT_JOURNAL_CAP,
            deep_search_max_files: crate::config::DEFAULT_DEEP_SEARCH_MAX_FILES,
        }
    }
}

/// Report of a checkpoint rollback.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CheckpointReport {
    /// The checkpoint rolled back to.
    pub checkpoint: String,
    /// Descriptions of the transactions undone, newest first.
    pub undone: Vec<String>,
    /// Set when a stuck entry interrupted the rollback.
    pub stuck_on: Option<String>,
}

struct ActiveTransaction {
    description: String,
    instruction: Option<String>,
    nesting: u32,
    /// First-observed bytes per path; `None` records "did not exist".
    snapshots: BTreeMap<PathBuf, Option<Vec<u8>>>,
    created: HashSet<PathBuf>,
    accessed: HashSet<PathBuf>,
    virtual_contents: HashMap<PathBuf, String>,
}

thread_local! {
    /// At most one active transaction per session on this thread.
    static ACTIVE: RefCell<HashMap<SessionId, ActiveTransaction>> =
        RefCell::new(HashMap::new());
}

// ---------------------------------------------------------------------------
// TransactionManager
// ---------------------------------------------------------------------------

/// Per-session transaction manager.
pub struct TransactionManager {
    session: SessionId,
    store: Arc<JournalStore>,
    tokens: Arc<TokenManager>,
    lineage: Arc<FileLineageTracker>,
    external: Arc<ExternalChangeTracker>,
    sandbox: Arc<PathSandbox>,
    limits: TxnLimits,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager").finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub(crate) fn new(
        session: SessionId,
        store: Arc<JournalStore>,
        tokens: Arc<TokenManager>,
        lineage: Arc<FileLineageTracker>,
        external: Arc<ExternalChangeTracker>,
        sandbox: Arc<PathSandbox>,
        limits: TxnLimits,
    ) -> Self {
        Self {
            session,
            store,
            tokens,
            lineage,
            external,
            sandbox,
            limits,
        }
    }

    /// The journal store backing this manager.
    #[must_use]
    pub fn store(&self) -> &Arc<JournalStore> {
        &self.store
    }

    // -- transaction lifecycle ---------------------------------------------

    /// Begin a transaction on this thread, or deepen the nesting of the one
    /// already active.
    pub fn begin(&self, description: &str, instruction: Option<&str>) {
        ACTIVE.with(|map| {
            let mut map = map.borrow_mut();
            if let Some(txn) = map.get_mut(&self.session) {
                txn.nesting += 1;
                debug!(nesting = txn.nesting, "transaction nesting deepened");
            } else {
                map.insert(
                    self.session.clone(),
                    ActiveTransaction {
                        description: description.to_owned(),
                        instruction: instruction.map(str::to_owned),
                        nesting: 0,
                        snapshots: BTreeMap::new(),
                        created: HashSet::new(),
                        accessed: HashSet::new(),
                        virtual_contents: HashMap::new(),
                    },
                );
                debug!(description, "transaction started");
            }
        });
    }

    /// Whether this thread holds an active transaction for the session.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        ACTIVE.with(|map| map.borrow().contains_key(&self.session))
    }

    /// Capture the pre-mutation state of `path`. Idempotent per path within
    /// one transaction; the first call wins.
    ///
    /// # Errors
    /// [`NtsError::TransactionRequired`] without an active transaction;
    /// I/O and size-ceiling failures from reading the current content.
    pub fn backup(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        self.sandbox.check_file_size(&path)?;
        let already = ACTIVE.with(|map| {
            map.borrow()
                .get(&self.session)
                .map(|txn| txn.snapshots.contains_key(&path))
        });
        match already {
            None => Err(NtsError::TransactionRequired {
                operation: "backup".to_owned(),
            }),
            Some(true) => Ok(()),
            Some(false) => {
                let content = match std::fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
                    Err(err) => return Err(err.into()),
                };
                self.lineage.register_file(&path);
                ACTIVE.with(|map| {
                    if let Some(txn) = map.borrow_mut().get_mut(&self.session) {
                        debug!(path = %path.display(), existed = content.is_some(), "backed up");
                        txn.snapshots.insert(path, content);
                    }
                });
                Ok(())
            }
        }
    }

    /// Flag a path as first created inside the active transaction; its
    /// token checks are skipped until commit.
    pub fn mark_created(&self, path: &Path) {
        self.with_active(|txn| {
            txn.created.insert(path.to_path_buf());
        });
    }

    /// Flag a path as read inside the active transaction; its token hash
    /// checks are deferred until commit.
    pub fn mark_accessed(&self, path: &Path) {
        self.with_active(|txn| {
            txn.accessed.insert(path.to_path_buf());
        });
    }

    /// Whether the active transaction owns all reads and writes of `path`.
    #[must_use]
    pub fn is_unlocked(&self, path: &Path) -> bool {
        ACTIVE.with(|map| {
            map.borrow().get(&self.session).is_some_and(|txn| {
                txn.created.contains(path) || txn.accessed.contains(path)
            })
        })
    }

    /// Stash a pending text buffer so later steps of a tool batch see it
    /// without a disk round trip.
    pub fn set_virtual_content(&self, path: &Path, text: &str) {
        self.with_active(|txn| {
            txn.virtual_contents
                .insert(path.to_path_buf(), text.to_owned());
        });
    }

    /// The pending buffer for `path`, if one was stashed in this
    /// transaction.
    #[must_use]
    pub fn virtual_content(&self, path: &Path) -> Option<String> {
        ACTIVE.with(|map| {
            map.borrow()
                .get(&self.session)
                .and_then(|txn| txn.virtual_contents.get(path).cloned())
        })
    }

    /// The paths touched by the active transaction on this thread.
    #[must_use]
    pub fn active_paths(&self) -> Vec<PathBuf> {
        ACTIVE.with(|map| {
            map.borrow()
                .get(&self.session)
                .map(|txn| txn.snapshots.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Validate a token at a write entry point: paths the transaction owns
    /// skip the content checks entirely.
    #[must_use]
    pub fn validate_token(
        &self,
        token: &LineAccessToken,
        current_range_text: &str,
        current_total_lines: u32,
    ) -> TokenValidation {
        if self.is_unlocked(&token.path) {
            return TokenValidation::Valid;
        }
        self.tokens
            .validate(token, current_range_text, current_total_lines)
    }

    /// Commit the transaction. Inner commits only unwind nesting; the
    /// outermost commit journals snapshots and diffs, clears the redo
    /// stack, and caps the undo stack. Returns the journal entry ID on an
    /// outermost, non-empty commit.
    ///
    /// # Errors
    /// [`NtsError::TransactionRequired`] without an active transaction.
    /// Journal failures are logged, not raised: file state on disk is
    /// already final, the user just sees a degraded journal.
    pub fn commit(&self) -> Result<Option<i64>> {
        let txn = ACTIVE.with(|map| -> Result<Option<ActiveTransaction>> {
            let mut map = map.borrow_mut();
            let Some(txn) = map.get_mut(&self.session) else {
                return Err(NtsError::TransactionRequired {
                    operation: "commit".to_owned(),
                });
            };
            if txn.nesting > 0 {
                txn.nesting -= 1;
                debug!(nesting = txn.nesting, "inner commit unwound");
                return Ok(None);
            }
            Ok(map.remove(&self.session))
        })?;
        let Some(txn) = txn else { return Ok(None) };

        if txn.snapshots.is_empty() {
            debug!("empty transaction committed; nothing journaled");
            return Ok(None);
        }

        let mut snapshots = Vec::with_capacity(txn.snapshots.len());
        let mut diffs = Vec::with_capacity(txn.snapshots.len());
        let mut post_hashes: Vec<(PathBuf, ContentHash)> = Vec::new();
        for (path, pre) in &txn.snapshots {
            let stored = self.sandbox.relativize(path);
            let post = std::fs::read(path).ok();
            let pre_text = pre.as_deref().map(String::from_utf8_lossy);
            let post_text = post.as_deref().map(String::from_utf8_lossy);
            diffs.push(DiffStatRow {
                file_path: stored.clone(),
                stat: compute_diff_stat(
                    pre_text.as_deref(),
                    post_text.as_deref(),
                    &stored.display().to_string(),
                ),
            });
            post_hashes.push((
                stored.clone(),
                post.as_deref().map_or(ContentHash::ZERO, hashing::crc32),
            ));
            snapshots.push(FileSnapshot::of(stored, pre.clone()));

            // The on-disk result is now the session's last-known state.
            self.external.snapshot(path);
            self.lineage.register_file(path);
            self.lineage.update_content_hash(path);
        }

        match self.journal_commit(&txn, &snapshots, &diffs, &post_hashes) {
            Ok(id) => {
                info!(
                    entry = id,
                    files = snapshots.len(),
                    description = %txn.description,
                    "transaction committed"
                );
                Ok(Some(id))
            }
            Err(err) => {
                warn!(error = %err, "journal commit failed; files are intact, journal degraded");
                Ok(None)
            }
        }
    }

    fn journal_commit(
        &self,
        txn: &ActiveTransaction,
        snapshots: &[FileSnapshot],
        diffs: &[DiffStatRow],
        post_hashes: &[(PathBuf, ContentHash)],
    ) -> Result<i64> {
        self.store.clear(Stack::Redo)?;
        let id = self.store.append(
            Stack::Undo,
            &NewEntry::transaction(&txn.description, txn.instruction.as_deref()),
            snapshots,
            diffs,
        )?;
        for (stored, hash) in post_hashes {
            self.store
                .set_meta(&post_crc_key(id, stored), &hash.to_string())?;
        }
        self.store.truncate(Stack::Undo, self.limits.journal_cap)?;
        self.store.increment_counter("totalEdits")?;
        Ok(id)
    }

    /// Abort the transaction at any nesting level, restoring every
    /// snapshotted path to its pre-transaction state.
    ///
    /// # Errors
    /// A restore failure is fatal: the workspace is in an unknown state and
    /// the error says so.
    pub fn rollback(&self) -> Result<()> {
        let txn = ACTIVE.with(|map| map.borrow_mut().remove(&self.session));
        let Some(txn) = txn else { return Ok(()) };

        let mut failures: Vec<String> = Vec::new();
        for (path, pre) in &txn.snapshots {
            if let Err(err) = write_restore(path, pre.as_deref(), &self.sandbox) {
                failures.push(format!("{}: {err}", path.display()));
            } else {
                self.external.remove_snapshot(path);
                self.lineage.update_content_hash(path);
                self.tokens.clear_path(path);
            }
        }
        if failures.is_empty() {
            info!(files = txn.snapshots.len(), "transaction rolled back");
            Ok(())
        } else {
            error!(?failures, "rollback failed; workspace in unknown state");
            Err(NtsError::Internal {
                detail: format!(
                    "rollback failed; the workspace is in an unknown state: {}",
                    failures.join("; ")
                ),
            })
        }
    }

    // -- external changes ---------------------------------------------------

    /// Journal a modification made outside the session. The entry's
    /// snapshot holds the *previous* content; undoing it rolls the external
    /// change back.
    pub fn record_external_change(
        &self,
        path: &Path,
        previous_text: &str,
        previous_hash: ContentHash,
        current_hash: ContentHash,
        description: &str,
    ) -> Result<i64> {
        let stored = self.sandbox.relativize(path);
        self.store.clear(Stack::Redo)?;
        let id = self.store.append(
            Stack::Undo,
            &NewEntry::external(stored.clone(), previous_hash, current_hash, description),
            &[FileSnapshot::of(
                stored,
                Some(previous_text.as_bytes().to_vec()),
            )],
            &[],
        )?;
        info!(path = %path.display(), entry = id, "external change journaled");
        Ok(id)
    }

    // -- checkpoints --------------------------------------------------------

    /// Append a named checkpoint marker to the undo stack.
    pub fn create_checkpoint(&self, name: &str) -> Result<i64> {
        let id = self
            .store
            .append(Stack::Undo, &NewEntry::checkpoint(name), &[], &[])?;
        debug!(name, entry = id, "checkpoint created");
        Ok(id)
    }

    /// Undo every entry newer than the named checkpoint, newest first,
    /// leaving the checkpoint itself in place. Non-transaction entries
    /// newer than the checkpoint are dropped without a restore.
    ///
    /// # Errors
    /// [`NtsError::Internal`] when no checkpoint of that name exists.
    pub fn rollback_to_checkpoint(&self, name: &str) -> Result<CheckpointReport> {
        let entries = self.store.entries(Stack::Undo)?;
        let Some(checkpoint_pos) = entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Checkpoint && e.checkpoint_name.as_deref() == Some(name))
            .map(|e| e.position)
        else {
            return Err(NtsError::Internal {
                detail: format!("checkpoint '{name}' not found on the undo stack"),
            });
        };

        let mut report = CheckpointReport {
            checkpoint: name.to_owned(),
            undone: Vec::new(),
            stuck_on: None,
        };
        for entry in entries
            .iter()
            .rev()
            .filter(|e| e.position > checkpoint_pos)
        {
            match entry.kind {
                EntryKind::Transaction => {
                    let undo = self.undo_entry(entry)?;
                    if matches!(undo.outcome, UndoOutcome::Stuck | UndoOutcome::GitFallback) {
                        report.stuck_on = entry.description.clone();
                        warn!(entry = entry.id, "checkpoint rollback interrupted by stuck entry");
                        return Ok(report);
                    }
                    report
                        .undone
                        .push(entry.description.clone().unwrap_or_default());
                }
                EntryKind::Checkpoint | EntryKind::External => {
                    self.store.delete_entry(entry.id)?;
                }
            }
        }
        info!(checkpoint = name, undone = report.undone.len(), "rolled back to checkpoint");
        Ok(report)
    }

    // -- undo / redo --------------------------------------------------------

    /// Undo the newest entry of the undo stack.
    pub fn undo(&self) -> Result<UndoReport> {
        let Some(entry) = self.store.last(Stack::Undo)? else {
            return Ok(UndoReport::empty(UndoOutcome::NothingToUndo, None));
        };
        self.undo_entry(&entry)
    }

    fn undo_entry(&self, entry: &JournalEntry) -> Result<UndoReport> {
        match entry.kind {
            EntryKind::Checkpoint => {
                self.store.delete_entry(entry.id)?;
                self.store.increment_counter("totalUndos")?;
                Ok(UndoReport::empty(
                    UndoOutcome::Success,
                    entry
                        .checkpoint_name
                        .as_ref()
                        .map(|n| format!("checkpoint '{n}' removed")),
                ))
            }
            EntryKind::External => self.undo_external(entry),
            EntryKind::Transaction => self.undo_transaction(entry),
        }
    }

    fn undo_external(&self, entry: &JournalEntry) -> Result<UndoReport> {
        let snapshots = self.store.snapshots(entry.id)?;
        let Some(snapshot) = snapshots.first() else {
            self.store.delete_entry(entry.id)?;
            return Ok(UndoReport::empty(UndoOutcome::Success, entry.description.clone()));
        };
        let path = self.sandbox.absolutize(&snapshot.file_path);
        let current = std::fs::read(&path).ok();

        write_restore(&path, snapshot.content.as_deref(), &self.sandbox)?;
        self.external.remove_snapshot(&path);
        self.tokens.clear_path(&path);
        self.lineage.update_content_hash(&path);

        // The matching redo entry restores the external edit.
        let redo = NewEntry::external(
            snapshot.file_path.clone(),
            entry.current_hash.unwrap_or(ContentHash::ZERO),
            entry.previous_hash.unwrap_or(ContentHash::ZERO),
            entry.description.as_deref().unwrap_or("external change"),
        );
        self.store.append(
            Stack::Redo,
            &redo,
            &[FileSnapshot::of(snapshot.file_path.clone(), current)],
            &[],
        )?;
        self.store.delete_entry(entry.id)?;
        self.store.increment_counter("totalUndos")?;
        info!(path = %path.display(), "external change rolled back");
        Ok(UndoReport {
            outcome: UndoOutcome::Success,
            files: vec![restore::FileRestore {
                original_path: path,
                outcome: restore::FileOutcome::Restored,
            }],
            recovery_hint: None,
            description: entry.description.clone(),
        })
    }

    fn undo_transaction(&self, entry: &JournalEntry) -> Result<UndoReport> {
        let snapshots = self.store.snapshots(entry.id)?;
        let engine = RestoreContext {
            lineage: &self.lineage,
            external: &self.external,
            sandbox: &self.sandbox,
            store: &self.store,
            deep_search_max_files: self.limits.deep_search_max_files,
        };
        let (report, redo_snapshots) = engine.restore_transaction(entry, &snapshots)?;

        if matches!(report.outcome, UndoOutcome::Stuck | UndoOutcome::GitFallback) {
            self.store.set_status(entry.id, EntryStatus::Stuck)?;
            return Ok(report);
        }
        if !report.files.is_empty() && redo_snapshots.is_empty() {
            // Nothing was actually written (every file orphaned or skipped):
            // the entry stays so the user can clear the blockers and retry.
            return Ok(report);
        }

        for file in &report.files {
            let target = match &file.outcome {
                restore::FileOutcome::Relocated { to } => to.clone(),
                _ => file.original_path.clone(),
            };
            self.external.remove_snapshot(&target);
            self.tokens.clear_path(&file.original_path);
            self.tokens.clear_path(&target);
            self.lineage.update_content_hash(&target);
        }

        self.store.append(
            Stack::Redo,
            &NewEntry::transaction(
                entry.description.as_deref().unwrap_or("transaction"),
                entry.instruction.as_deref(),
            ),
            &redo_snapshots,
            &[],
        )?;
        self.store.delete_entry(entry.id)?;
        self.store.increment_counter("totalUndos")?;
        Ok(report)
    }

    /// Redo the newest entry of the redo stack.
    pub fn redo(&self) -> Result<UndoReport> {
        let Some(entry) = self.store.last(Stack::Redo)? else {
            return Ok(UndoReport::empty(UndoOutcome::NothingToUndo, None));
        };
        let snapshots = self.store.snapshots(entry.id)?;

        let mut files = Vec::with_capacity(snapshots.len());
        let mut undo_snapshots = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let path = self.sandbox.absolutize(&snapshot.file_path);
            let current = std::fs::read(&path).ok();
            write_restore(&path, snapshot.content.as_deref(), &self.sandbox)?;
            undo_snapshots.push(FileSnapshot::of(snapshot.file_path.clone(), current));
            self.external.remove_snapshot(&path);
            self.tokens.clear_path(&path);
            self.lineage.update_content_hash(&path);
            files.push(restore::FileRestore {
                original_path: path,
                outcome: restore::FileOutcome::Restored,
            });
        }

        let back = match entry.kind {
            EntryKind::External => NewEntry::external(
                entry.affected_path.clone().unwrap_or_default(),
                entry.current_hash.unwrap_or(ContentHash::ZERO),
                entry.previous_hash.unwrap_or(ContentHash::ZERO),
                entry.description.as_deref().unwrap_or("external change"),
            ),
            _ => NewEntry::transaction(
                entry.description.as_deref().unwrap_or("transaction"),
                entry.instruction.as_deref(),
            ),
        };
        self.store
            .append(Stack::Undo, &back, &undo_snapshots, &[])?;
        self.store.delete_entry(entry.id)?;
        self.store.increment_counter("totalUndos")?;
        info!(files = files.len(), "redo applied");
        Ok(UndoReport {
            outcome: UndoOutcome::Success,
            files,
            recovery_hint: None,
            description: entry.description.clone(),
        })
    }

    // -- read-only projections ---------------------------------------------

    /// Entries of one stack, oldest first.
    pub fn journal(&self, stack: Stack) -> Result<Vec<JournalEntry>> {
        self.store.entries(stack)
    }

    /// The newest `n` undo entries, oldest first.
    pub fn journal_tail(&self, n: usize) -> Result<Vec<JournalEntry>> {
        self.store.tail(Stack::Undo, n)
    }

    /// Transaction and external entries that touched `path`.
    pub fn file_history(&self, path: &Path) -> Result<Vec<JournalEntry>> {
        self.store
            .entries_for_path(&self.sandbox.relativize(&self.sandbox.absolutize(path)))
    }

    /// Total committed transactions in this session.
    pub fn total_edits(&self) -> Result<i64> {
        self.store.counter("totalEdits")
    }

    /// Total successful undo/redo operations in this session.
    pub fn total_undos(&self) -> Result<i64> {
        self.store.counter("totalUndos")
    }

    /// Every path ever snapshotted in this session, absolute.
    pub fn affected_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .store
            .snapshot_paths()?
            .into_iter()
            .map(|p| self.sandbox.absolutize(&p))
            .collect())
    }

    fn with_active(&self, f: impl FnOnce(&mut ActiveTransaction)) {
        ACTIVE.with(|map| {
            if let Some(txn) = map.borrow_mut().get_mut(&self.session) {
                f(txn);
            }
        });
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        // A dropped manager with a live transaction on this thread would
        // leak per-thread state; clean rather than restore (the owner
        // decides whether to roll back before dropping).
        ACTIVE.with(|map| {
            map.borrow_mut().remove(&self.session);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
