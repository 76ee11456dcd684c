//! SQLite-backed journal store.
//!
//! One database per persisted session (`.nts/sessions/<id>/journal.db`);
//! the `default` session runs on an in-memory database that dies with the
//! process. Entries, snapshots, and diff stats for one commit are written
//! in a single SQL transaction, so reactivation never sees a torn entry.
//! Snapshot children are removed by `ON DELETE CASCADE` when their entry
//! goes away.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::error::Result;
use crate::model::diff::DiffStat;
use crate::model::types::ContentHash;

use super::types::{
    DiffStatRow, EntryKind, EntryStatus, FileSnapshot, JournalEntry, NewEntry, Stack,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS journal_entries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    stack           TEXT NOT NULL,
    entry_type      TEXT NOT NULL,
    position        INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL,
    instruction     TEXT,
    affected_path   TEXT,
    previous_crc    INTEGER,
    current_crc     INTEGER,
    checkpoint_name TEXT,
    UNIQUE (stack, position)
);

CREATE TABLE IF NOT EXISTS file_snapshots (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id  INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    file_path TEXT NOT NULL,
    content   BLOB,
    file_size INTEGER NOT NULL,
    crc32c    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS diff_stats (
    entry_id        INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    file_path       TEXT NOT NULL,
    lines_added     INTEGER NOT NULL,
    lines_deleted   INTEGER NOT NULL,
    affected_blocks TEXT NOT NULL,
    unified_diff    TEXT
);

CREATE TABLE IF NOT EXISTS task_counters (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS task_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_entry ON file_snapshots(entry_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_path  ON file_snapshots(file_path);
";

/// Durable per-session undo/redo store.
pub struct JournalStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore").finish_non_exhaustive()
    }
}

impl JournalStore {
    /// Open (creating if needed) the database at `path`, or an in-memory
    /// database for `None`.
    ///
    /// # Errors
    /// Propagates SQLite failures as [`crate::error::NtsError::Journal`].
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -- writes -------------------------------------------------------------

    /// Append an entry with its snapshots and diff stats in one ACID commit.
    /// Returns the new entry's ID.
    pub fn append(
        &self,
        stack: Stack,
        entry: &NewEntry,
        snapshots: &[FileSnapshot],
        diffs: &[DiffStatRow],
    ) -> Result<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM journal_entries WHERE stack = ?1",
            params![stack.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO journal_entries
                 (stack, entry_type, position, created_at, description, status,
                  instruction, affected_path, previous_crc, current_crc, checkpoint_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                stack.as_str(),
                entry.kind().as_str(),
                position,
                Utc::now().to_rfc3339(),
                entry.description,
                entry.status().as_str(),
                entry.instruction,
                entry.affected_path.as_ref().map(|p| p.display().to_string()),
                entry.previous_hash.map(|h| i64::from(h.value())),
                entry.current_hash.map(|h| i64::from(h.value())),
                entry.checkpoint_name,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for snap in snapshots {
            tx.execute(
                "INSERT INTO file_snapshots (entry_id, file_path, content, file_size, crc32c)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    snap.file_path.display().to_string(),
                    snap.content,
                    i64::try_from(snap.file_size).unwrap_or(i64::MAX),
                    i64::from(snap.hash.value()),
                ],
            )?;
        }
        for diff in diffs {
            tx.execute(
                "INSERT INTO diff_stats
                     (entry_id, file_path, lines_added, lines_deleted, affected_blocks, unified_diff)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    diff.file_path.display().to_string(),
                    i64::from(diff.stat.lines_added),
                    i64::from(diff.stat.lines_deleted),
                    serde_json::to_string(&diff.stat.affected_blocks).unwrap_or_default(),
                    diff.stat.unified_diff,
                ],
            )?;
        }
        tx.commit()?;
        debug!(id, stack = stack.as_str(), snapshots = snapshots.len(), "journal entry appended");
        Ok(id)
    }

    /// Delete an entry; snapshot and diff children cascade.
    pub fn delete_entry(&self, id: i64) -> Result<()> {
        self.lock()
            .execute("DELETE FROM journal_entries WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Move an entry onto the other stack without losing its children. The
    /// entry takes the next position of the target stack.
    pub fn move_to_stack(&self, id: i64, target: Stack) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM journal_entries WHERE stack = ?1",
            params![target.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE journal_entries SET stack = ?1, position = ?2 WHERE id = ?3",
            params![target.as_str(), position, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every entry of a stack.
    pub fn clear(&self, stack: Stack) -> Result<()> {
        self.lock().execute(
            "DELETE FROM journal_entries WHERE stack = ?1",
            params![stack.as_str()],
        )?;
        Ok(())
    }

    /// Drop the oldest entries of a stack until at most `cap` remain.
    pub fn truncate(&self, stack: Stack, cap: usize) -> Result<()> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journal_entries WHERE stack = ?1",
            params![stack.as_str()],
            |row| row.get(0),
        )?;
        let excess = count - i64::try_from(cap).unwrap_or(i64::MAX);
        if excess > 0 {
            conn.execute(
                "DELETE FROM journal_entries WHERE id IN (
                     SELECT id FROM journal_entries WHERE stack = ?1
                     ORDER BY position ASC LIMIT ?2)",
                params![stack.as_str(), excess],
            )?;
        }
        Ok(())
    }

    /// Mark an entry's status (used to flag stuck undos).
    pub fn set_status(&self, id: i64, status: EntryStatus) -> Result<()> {
        self.lock().execute(
            "UPDATE journal_entries SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    // -- reads --------------------------------------------------------------

    /// Every entry of a stack, ordered by position.
    pub fn entries(&self, stack: Stack) -> Result<Vec<JournalEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, stack, entry_type, position, created_at, description, status,
                    instruction, affected_path, previous_crc, current_crc, checkpoint_name
             FROM journal_entries WHERE stack = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![stack.as_str()], parse_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The newest entry of a stack.
    pub fn last(&self, stack: Stack) -> Result<Option<JournalEntry>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, stack, entry_type, position, created_at, description, status,
                    instruction, affected_path, previous_crc, current_crc, checkpoint_name
             FROM journal_entries WHERE stack = ?1 ORDER BY position DESC LIMIT 1",
            params![stack.as_str()],
            parse_entry,
        )
        .optional()
        .map_err(Into::into)
    }

    /// The newest `n` entries of a stack, oldest first.
    pub fn tail(&self, stack: Stack, n: usize) -> Result<Vec<JournalEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, stack, entry_type, position, created_at, description, status,
                    instruction, affected_path, previous_crc, current_crc, checkpoint_name
             FROM journal_entries WHERE stack = ?1 ORDER BY position DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![stack.as_str(), i64::try_from(n).unwrap_or(i64::MAX)],
            parse_entry,
        )?;
        let mut entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// Entries on either stack that touched `path`, in insertion order.
    pub fn entries_for_path(&self, path: &Path) -> Result<Vec<JournalEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e.id, e.stack, e.entry_type, e.position, e.created_at,
                    e.description, e.status, e.instruction, e.affected_path,
                    e.previous_crc, e.current_crc, e.checkpoint_name
             FROM journal_entries e
             LEFT JOIN file_snapshots s ON s.entry_id = e.id
             WHERE s.file_path = ?1 OR e.affected_path = ?1
             ORDER BY e.id ASC",
        )?;
        let rows = stmt.query_map(params![path.display().to_string()], parse_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The snapshots attached to an entry.
    pub fn snapshots(&self, entry_id: i64) -> Result<Vec<FileSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, content, file_size, crc32c
             FROM file_snapshots WHERE entry_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            let path: String = row.get(0)?;
            let content: Option<Vec<u8>> = row.get(1)?;
            let size: i64 = row.get(2)?;
            let crc: i64 = row.get(3)?;
            Ok(FileSnapshot {
                file_path: PathBuf::from(path),
                content,
                file_size: u64::try_from(size).unwrap_or(0),
                hash: ContentHash(u32::try_from(crc).unwrap_or(0)),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The diff stats attached to an entry.
    pub fn diff_stats(&self, entry_id: i64) -> Result<Vec<DiffStatRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, lines_added, lines_deleted, affected_blocks, unified_diff
             FROM diff_stats WHERE entry_id = ?1",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            let path: String = row.get(0)?;
            let added: i64 = row.get(1)?;
            let deleted: i64 = row.get(2)?;
            let blocks: String = row.get(3)?;
            let unified: Option<String> = row.get(4)?;
            Ok(DiffStatRow {
                file_path: PathBuf::from(path),
                stat: DiffStat {
                    lines_added: u32::try_from(added).unwrap_or(0),
                    lines_deleted: u32::try_from(deleted).unwrap_or(0),
                    affected_blocks: serde_json::from_str(&blocks).unwrap_or_default(),
                    unified_diff: unified,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every distinct path that appears in a snapshot, sorted.
    pub fn snapshot_paths(&self) -> Result<Vec<PathBuf>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT file_path FROM file_snapshots ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    // -- counters and metadata ---------------------------------------------

    /// Add one to a named counter, returning the new value.
    pub fn increment_counter(&self, name: &str) -> Result<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO task_counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            params![name],
        )?;
        let value: i64 = tx.query_row(
            "SELECT value FROM task_counters WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value)
    }

    /// Read a named counter (zero when absent).
    pub fn counter(&self, name: &str) -> Result<i64> {
        self.lock()
            .query_row(
                "SELECT value FROM task_counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map(|v| v.unwrap_or(0))
            .map_err(Into::into)
    }

    /// Store a metadata key.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO task_metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read a metadata key.
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        self.lock()
            .query_row(
                "SELECT value FROM task_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn parse_entry(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
    let stack_raw: String = row.get(1)?;
    let kind_raw: String = row.get(2)?;
    let created_raw: String = row.get(4)?;
    let status_raw: String = row.get(6)?;
    Ok(JournalEntry {
        id: row.get(0)?,
        stack: Stack::parse(&stack_raw).ok_or_else(|| bad_text(1, &stack_raw))?,
        kind: EntryKind::parse(&kind_raw).ok_or_else(|| bad_text(2, &kind_raw))?,
        position: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| bad_text(4, &created_raw))?,
        description: row.get(5)?,
        status: EntryStatus::parse(&status_raw).ok_or_else(|| bad_text(6, &status_raw))?,
        instruction: row.get(7)?,
        affected_path: row.get::<_, Option<String>>(8)?.map(PathBuf::from),
        previous_hash: row
            .get::<_, Option<i64>>(9)?
            .map(|v| ContentHash(u32::try_from(v).unwrap_or(0))),
        current_hash: row
            .get::<_, Option<i64>>(10)?
            .map(|v| ContentHash(u32::try_from(v).unwrap_or(0))),
        checkpoint_name: row.get(11)?,
    })
}

fn bad_text(index: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        Type::Text,
        format!("unrecognized value '{value}'").into(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::compute_diff_stat;

    fn store() -> JournalStore {
        JournalStore::open(None).unwrap()
    }

    fn snap(path: &str, content: &str) -> FileSnapshot {
        FileSnapshot::of(PathBuf::from(path), Some(content.as_bytes().to_vec()))
    }

    #[test]
    fn appended_entries_take_monotonic_positions() {
        let store = store();
        for i in 0..3 {
            store
                .append(
                    Stack::Undo,
                    &NewEntry::transaction(&format!("edit {i}"), None),
                    &[],
                    &[],
                )
                .unwrap();
        }
        let entries = store.entries(Stack::Undo).unwrap();
        let positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn entry_round_trips_all_fields() {
        let store = store();
        let id = store
            .append(
                Stack::Undo,
                &NewEntry::external(
                    PathBuf::from("src/a.rs"),
                    ContentHash(0x11),
                    ContentHash(0x22),
                    "external edit",
                ),
                &[snap("src/a.rs", "old body")],
                &[],
            )
            .unwrap();
        let entry = store.last(Stack::Undo).unwrap().unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.kind, EntryKind::External);
        assert_eq!(entry.status, EntryStatus::Committed);
        assert_eq!(entry.affected_path.as_deref(), Some(Path::new("src/a.rs")));
        assert_eq!(entry.previous_hash, Some(ContentHash(0x11)));
        assert_eq!(entry.current_hash, Some(ContentHash(0x22)));
    }

    #[test]
    fn snapshots_and_diffs_round_trip() {
        let store = store();
        let stat = compute_diff_stat(Some("a\n"), Some("b\n"), "f.txt");
        let id = store
            .append(
                Stack::Undo,
                &NewEntry::transaction("edit f", Some("change a to b")),
                &[snap("f.txt", "a\n")],
                &[DiffStatRow {
                    file_path: PathBuf::from("f.txt"),
                    stat: stat.clone(),
                }],
            )
            .unwrap();
        let snaps = store.snapshots(id).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].content.as_deref(), Some(b"a\n".as_slice()));
        assert_eq!(snaps[0].hash, crate::hashing::crc32(b"a\n"));
        let diffs = store.diff_stats(id).unwrap();
        assert_eq!(diffs[0].stat, stat);
    }

    #[test]
    fn absent_file_snapshot_round_trips_as_none() {
        let store = store();
        let id = store
            .append(
                Stack::Undo,
                &NewEntry::transaction("create", None),
                &[FileSnapshot::of(PathBuf::from("new.txt"), None)],
                &[],
            )
            .unwrap();
        let snaps = store.snapshots(id).unwrap();
        assert!(snaps[0].content.is_none());
        assert!(snaps[0].hash.is_zero());
    }

    #[test]
    fn delete_cascades_to_children() {
        let store = store();
        let id = store
            .append(
                Stack::Undo,
                &NewEntry::transaction("edit", None),
                &[snap("f.txt", "x")],
                &[DiffStatRow {
                    file_path: PathBuf::from("f.txt"),
                    stat: DiffStat::default(),
                }],
            )
            .unwrap();
        store.delete_entry(id).unwrap();
        assert!(store.snapshots(id).unwrap().is_empty());
        assert!(store.diff_stats(id).unwrap().is_empty());
        assert!(store.entries(Stack::Undo).unwrap().is_empty());
    }

    #[test]
    fn move_to_stack_keeps_children_and_reassigns_position() {
        let store = store();
        store
            .append(Stack::Redo, &NewEntry::transaction("earlier", None), &[], &[])
            .unwrap();
        let id = store
            .append(
                Stack::Undo,
                &NewEntry::transaction("moving", None),
                &[snap("f.txt", "kept")],
                &[],
            )
            .unwrap();
        store.move_to_stack(id, Stack::Redo).unwrap();

        assert!(store.entries(Stack::Undo).unwrap().is_empty());
        let redo = store.entries(Stack::Redo).unwrap();
        assert_eq!(redo.len(), 2);
        assert_eq!(redo[1].id, id);
        assert_eq!(redo[1].position, 2);
        assert_eq!(store.snapshots(id).unwrap().len(), 1);
    }

    #[test]
    fn clear_empties_one_stack_only() {
        let store = store();
        store
            .append(Stack::Undo, &NewEntry::transaction("u", None), &[], &[])
            .unwrap();
        store
            .append(Stack::Redo, &NewEntry::transaction("r", None), &[], &[])
            .unwrap();
        store.clear(Stack::Redo).unwrap();
        assert_eq!(store.entries(Stack::Undo).unwrap().len(), 1);
        assert!(store.entries(Stack::Redo).unwrap().is_empty());
    }

    #[test]
    fn truncate_drops_the_oldest_entries() {
        let store = store();
        for i in 0..5 {
            store
                .append(
                    Stack::Undo,
                    &NewEntry::transaction(&format!("edit {i}"), None),
                    &[],
                    &[],
                )
                .unwrap();
        }
        store.truncate(Stack::Undo, 3).unwrap();
        let entries = store.entries(Stack::Undo).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].description.as_deref(), Some("edit 2"));
    }

    #[test]
    fn checkpoint_entries_carry_their_name() {
        let store = store();
        store
            .append(Stack::Undo, &NewEntry::checkpoint("before-refactor"), &[], &[])
            .unwrap();
        let entry = store.last(Stack::Undo).unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Checkpoint);
        assert_eq!(entry.checkpoint_name.as_deref(), Some("before-refactor"));
    }

    #[test]
    fn set_status_marks_entries_stuck() {
        let store = store();
        let id = store
            .append(Stack::Undo, &NewEntry::transaction("edit", None), &[], &[])
            .unwrap();
        store.set_status(id, EntryStatus::Stuck).unwrap();
        assert_eq!(store.last(Stack::Undo).unwrap().unwrap().status, EntryStatus::Stuck);
    }

    #[test]
    fn counters_increment_from_zero() {
        let store = store();
        assert_eq!(store.counter("totalEdits").unwrap(), 0);
        assert_eq!(store.increment_counter("totalEdits").unwrap(), 1);
        assert_eq!(store.increment_counter("totalEdits").unwrap(), 2);
        assert_eq!(store.counter("totalEdits").unwrap(), 2);
    }

    #[test]
    fn metadata_round_trips_and_overwrites() {
        let store = store();
        assert_eq!(store.meta("activeTodo").unwrap(), None);
        store.set_meta("activeTodo", "plan.md").unwrap();
        store.set_meta("activeTodo", "plan2.md").unwrap();
        assert_eq!(store.meta("activeTodo").unwrap().as_deref(), Some("plan2.md"));
    }

    #[test]
    fn tail_returns_newest_entries_oldest_first() {
        let store = store();
        for i in 0..4 {
            store
                .append(
                    Stack::Undo,
                    &NewEntry::transaction(&format!("edit {i}"), None),
                    &[],
                    &[],
                )
                .unwrap();
        }
        let tail = store.tail(Stack::Undo, 2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].description.as_deref(), Some("edit 2"));
        assert_eq!(tail[1].description.as_deref(), Some("edit 3"));
    }

    #[test]
    fn entries_for_path_joins_snapshots_and_external_entries() {
        let store = store();
        store
            .append(
                Stack::Undo,
                &NewEntry::transaction("edit a", None),
                &[snap("a.txt", "v1")],
                &[],
            )
            .unwrap();
        store
            .append(
                Stack::Undo,
                &NewEntry::external(
                    PathBuf::from("a.txt"),
                    ContentHash(1),
                    ContentHash(2),
                    "outside edit",
                ),
                &[],
                &[],
            )
            .unwrap();
        store
            .append(
                Stack::Undo,
                &NewEntry::transaction("edit b", None),
                &[snap("b.txt", "v1")],
                &[],
            )
            .unwrap();
        let history = store.entries_for_path(Path::new("a.txt")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EntryKind::Transaction);
        assert_eq!(history[1].kind, EntryKind::External);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("journal.db");
        {
            let store = JournalStore::open(Some(&db)).unwrap();
            store
                .append(
                    Stack::Undo,
                    &NewEntry::transaction("durable", None),
                    &[snap("f.txt", "body")],
                    &[],
                )
                .unwrap();
        }
        let store = JournalStore::open(Some(&db)).unwrap();
        let entries = store.entries(Stack::Undo).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description.as_deref(), Some("durable"));
        assert_eq!(store.snapshots(entries[0].id).unwrap().len(), 1);
    }
}
