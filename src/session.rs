//! Session contexts and the process-wide registry.
//!
//! A session is an isolated workspace of state for one client: its own
//! token manager, lineage tracker, external-change cache, and journal.
//! Sessions are created lazily on first reference; a session whose
//! directory already exists on disk is *reactivated* — journal and
//! metadata reload, nothing is cleared. The `default` session backs
//! callers that never bind a session and is never persisted.
//!
//! Metadata lives in `.nts/sessions/<id>/session.meta` as line-oriented
//! `key=value` so it stays trivially reloadable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{NtsError, Result};
use crate::external::ExternalChangeTracker;
use crate::journal::JournalStore;
use crate::lineage::FileLineageTracker;
use crate::model::types::SessionId;
use crate::sandbox::PathSandbox;
use crate::token::TokenManager;
use crate::txn::{TransactionManager, TxnLimits};

/// Name of the metadata file inside a session directory.
const META_FILE: &str = "session.meta";

/// Name of the journal database inside a session directory.
const JOURNAL_FILE: &str = "journal.db";

// ---------------------------------------------------------------------------
// SessionMetadata
// ---------------------------------------------------------------------------

/// Persisted session metadata.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SessionMetadata {
    /// The session's identifier.
    pub session_id: String,
    /// When the session was first created.
    pub created: DateTime<Utc>,
    /// Last time the session served a request.
    pub last_activity: DateTime<Utc>,
    /// Name of the active TODO file, if one is set.
    pub active_todo: Option<String>,
}

impl SessionMetadata {
    fn render(&self) -> String {
        let mut out = format!(
            "sessionId={}\ncreated={}\nlastActivity={}\n",
            self.session_id,
            self.created.to_rfc3339(),
            self.last_activity.to_rfc3339(),
        );
        if let Some(todo) = &self.active_todo {
            out.push_str(&format!("activeTodo={todo}\n"));
        }
        out
    }

    fn parse(text: &str) -> Option<Self> {
        let mut session_id = None;
        let mut created = None;
        let mut last_activity = None;
        let mut active_todo = None;
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "sessionId" => session_id = Some(value.to_owned()),
                "created" => created = parse_rfc3339(value),
                "lastActivity" => last_activity = parse_rfc3339(value),
                "activeTodo" => active_todo = Some(value.to_owned()),
                _ => {}
            }
        }
        Some(Self {
            session_id: session_id?,
            created: created?,
            last_activity: last_activity?,
            active_todo,
        })
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// Everything one session owns.
#[derive(Debug)]
pub struct SessionContext {
    /// The session's identifier.
    pub id: SessionId,
    /// Line access tokens issued in this session.
    pub tokens: Arc<TokenManager>,
    /// File identity tracking.
    pub lineage: Arc<FileLineageTracker>,
    /// Last-observed content cache for external-change detection.
    pub external: Arc<ExternalChangeTracker>,
    /// Transaction and journal driver.
    pub txn: Arc<TransactionManager>,
    sandbox: Arc<PathSandbox>,
    created: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    active_todo: Mutex<Option<String>>,
}

impl SessionContext {
    fn build(
        id: SessionId,
        sandbox: Arc<PathSandbox>,
        limits: TxnLimits,
        store: JournalStore,
        meta: Option<SessionMetadata>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new());
        let lineage = Arc::new(FileLineageTracker::new(Arc::clone(&sandbox)));
        let external = Arc::new(ExternalChangeTracker::new());
        let store = Arc::new(store);
        let txn = Arc::new(TransactionManager::new(
            id.clone(),
            Arc::clone(&store),
            Arc::clone(&tokens),
            Arc::clone(&lineage),
            Arc::clone(&external),
            Arc::clone(&sandbox),
            limits,
        ));
        let now = Utc::now();
        Self {
            id,
            tokens,
            lineage,
            external,
            txn,
            sandbox,
            created: meta.as_ref().map_or(now, |m| m.created),
            last_activity: Mutex::new(meta.as_ref().map_or(now, |m| m.last_activity)),
            active_todo: Mutex::new(meta.and_then(|m| m.active_todo)),
        }
    }

    /// The session's directory on disk (`None` for the default session or
    /// when no sandbox root is configured).
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        if self.id.is_default() {
            return None;
        }
        session_dir(&self.sandbox, &self.id)
    }

    /// The session's current metadata snapshot.
    #[must_use]
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.id.to_string(),
            created: self.created,
            last_activity: *self
                .last_activity
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            active_todo: self
                .active_todo
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        }
    }

    /// Update the last-activity stamp and persist metadata.
    ///
    /// # Errors
    /// Propagates metadata write failures for persisted sessions.
    pub fn touch_activity(&self) -> Result<()> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Utc::now();
        self.persist_metadata()
    }

    /// Set (or clear) the active TODO file name and persist metadata.
    ///
    /// # Errors
    /// Propagates metadata write failures for persisted sessions.
    pub fn set_active_todo(&self, todo: Option<String>) -> Result<()> {
        *self
            .active_todo
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = todo;
        self.persist_metadata()
    }

    fn persist_metadata(&self) -> Result<()> {
        let Some(dir) = self.directory() else {
            return Ok(());
        };
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(META_FILE), self.metadata().render())?;
        Ok(())
    }
}

fn session_dir(sandbox: &PathSandbox, id: &SessionId) -> Option<PathBuf> {
    sandbox
        .primary_root()
        .map(|root| root.join(".nts").join("sessions").join(id.as_str()))
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Process-wide map of live sessions plus the thread-bound current session.
pub struct SessionRegistry {
    sandbox: Arc<PathSandbox>,
    limits: Mutex<TxnLimits>,
    sessions: Mutex<HashMap<SessionId, Arc<SessionContext>>>,
}

static GLOBAL: LazyLock<SessionRegistry> =
    LazyLock::new(|| SessionRegistry::new(PathSandbox::global()));

thread_local! {
    static CURRENT: std::cell::RefCell<Option<Arc<SessionContext>>> =
        const { std::cell::RefCell::new(None) };
}

impl SessionRegistry {
    /// A registry bound to a sandbox (tests use private instances; the
    /// process uses [`global`](Self::global)).
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self {
            sandbox,
            limits: Mutex::new(TxnLimits::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry, bound to the global sandbox.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Set the limits applied to sessions created from now on.
    pub fn set_limits(&self, limits: TxnLimits) {
        *self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = limits;
    }

    /// Fetch a live session or create it, reactivating from disk when the
    /// session directory already holds metadata.
    ///
    /// # Errors
    /// Journal or metadata I/O failures.
    pub fn get_or_create(&self, id: &SessionId) -> Result<Arc<SessionContext>> {
        if let Some(ctx) = self.lock_sessions().get(id) {
            return Ok(Arc::clone(ctx));
        }

        let limits = *self
            .limits
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let ctx = if id.is_default() {
            Arc::new(SessionContext::build(
                id.clone(),
                Arc::clone(&self.sandbox),
                limits,
                JournalStore::open(None)?,
                None,
            ))
        } else {
            let Some(dir) = session_dir(&self.sandbox, id) else {
                // No root configured: behave like the default session,
                // memory only.
                return Ok(self.insert(Arc::new(SessionContext::build(
                    id.clone(),
                    Arc::clone(&self.sandbox),
                    limits,
                    JournalStore::open(None)?,
                    None,
                ))));
            };
            let meta_path = dir.join(META_FILE);
            let meta = std::fs::read_to_string(&meta_path)
                .ok()
                .and_then(|text| SessionMetadata::parse(&text));
            let reactivated = meta.is_some();
            std::fs::create_dir_all(&dir)?;
            let store = JournalStore::open(Some(&dir.join(JOURNAL_FILE)))?;
            let ctx = Arc::new(SessionContext::build(
                id.clone(),
                Arc::clone(&self.sandbox),
                limits,
                store,
                meta,
            ));
            ctx.persist_metadata()?;
            if reactivated {
                info!(session = %id, "session reactivated from disk");
            } else {
                info!(session = %id, "session created");
            }
            ctx
        };
        Ok(self.insert(ctx))
    }

    fn insert(&self, ctx: Arc<SessionContext>) -> Arc<SessionContext> {
        self.lock_sessions().insert(ctx.id.clone(), Arc::clone(&ctx));
        ctx
    }

    /// Bind a context to the calling thread for the duration of a request.
    pub fn set_current(ctx: &Arc<SessionContext>) {
        CURRENT.with(|cell| *cell.borrow_mut() = Some(Arc::clone(ctx)));
    }

    /// The context bound to the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Arc<SessionContext>> {
        CURRENT.with(|cell| cell.borrow().clone())
    }

    /// Unbind the calling thread.
    pub fn clear_current() {
        CURRENT.with(|cell| *cell.borrow_mut() = None);
    }

    /// The bound context, falling back to the `default` session.
    ///
    /// # Errors
    /// Journal failures while lazily creating the default session.
    pub fn current_or_default(&self) -> Result<Arc<SessionContext>> {
        if let Some(ctx) = Self::current() {
            return Ok(ctx);
        }
        self.get_or_create(&SessionId::default_session())
    }

    /// Release a session's in-memory state. On-disk state stays; the
    /// session can be reactivated later.
    pub fn destroy(&self, id: &SessionId) {
        if self.lock_sessions().remove(id).is_some() {
            debug!(session = %id, "session destroyed");
        }
    }

    /// Drop every in-memory session (process-wide reset).
    pub fn reset(&self) {
        self.lock_sessions().clear();
        Self::clear_current();
    }

    /// Whether a session directory with metadata exists on disk.
    #[must_use]
    pub fn exists_on_disk(&self, id: &SessionId) -> bool {
        session_dir(&self.sandbox, id).is_some_and(|dir| dir.join(META_FILE).exists())
    }

    /// Whether the session is live in memory.
    #[must_use]
    pub fn is_active_in_memory(&self, id: &SessionId) -> bool {
        self.lock_sessions().contains_key(id)
    }

    /// Read a session's metadata from memory or disk.
    ///
    /// # Errors
    /// [`NtsError::SessionNotFound`] when the session exists nowhere.
    pub fn metadata(&self, id: &SessionId) -> Result<SessionMetadata> {
        if let Some(ctx) = self.lock_sessions().get(id) {
            return Ok(ctx.metadata());
        }
        let meta = session_dir(&self.sandbox, id)
            .and_then(|dir| std::fs::read_to_string(dir.join(META_FILE)).ok())
            .and_then(|text| SessionMetadata::parse(&text));
        meta.ok_or_else(|| NtsError::SessionNotFound {
            id: id.to_string(),
        })
    }

    /// Reactivate a session known to exist on disk.
    ///
    /// # Errors
    /// [`NtsError::SessionNotFound`] when no on-disk state exists.
    pub fn reactivate(&self, id: &SessionId) -> Result<Arc<SessionContext>> {
        if !self.is_active_in_memory(id) && !self.exists_on_disk(id) {
            return Err(NtsError::SessionNotFound {
                id: id.to_string(),
            });
        }
        self.get_or_create(id)
    }

    /// IDs of every session directory on disk, sorted.
    #[must_use]
    pub fn list_on_disk(&self) -> Vec<String> {
        let Some(root) = self.sandbox.primary_root() else {
            return Vec::new();
        };
        let sessions = root.join(".nts").join("sessions");
        let Ok(entries) = std::fs::read_dir(sessions) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join(META_FILE).exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        ids
    }

    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionContext>>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
