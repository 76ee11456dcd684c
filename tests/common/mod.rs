//! Shared test infrastructure.
#![allow(dead_code)]
//!
//! Provides [`TestSpace`], a self-contained project root in a temporary
//! directory with its own sandbox and session registry, so integration
//! tests run in parallel without sharing process-wide state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use nts::sandbox::PathSandbox;
use nts::session::{SessionContext, SessionRegistry};
use nts::model::types::SessionId;

/// A self-contained project root with its own sandbox and registry.
pub struct TestSpace {
    /// The temp dir — held to prevent premature cleanup.
    _dir: TempDir,
    /// Absolute path of the project root.
    pub root: PathBuf,
    /// Sandbox authorized for exactly this root.
    pub sandbox: Arc<PathSandbox>,
    /// Registry bound to the sandbox.
    pub registry: SessionRegistry,
}

impl TestSpace {
    /// A fresh root with its sandbox and registry.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path().to_path_buf();
        let sandbox = Arc::new(PathSandbox::new());
        sandbox.set_root(root.clone());
        let registry = SessionRegistry::new(Arc::clone(&sandbox));
        Self {
            _dir: dir,
            root,
            sandbox,
            registry,
        }
    }

    /// Get or create a session.
    pub fn session(&self, name: &str) -> Arc<SessionContext> {
        self.registry
            .get_or_create(&SessionId::new(name).expect("valid session id"))
            .expect("session creation")
    }

    /// Absolute path of a file under the root.
    #[must_use]
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write a file under the root, creating parent directories.
    pub fn seed(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parents");
        }
        std::fs::write(&path, content).expect("seed file");
        path
    }

    /// Read a file under the root.
    #[must_use]
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read file")
    }

    /// Run one already-backed-up mutation inside a committed transaction.
    pub fn commit_edit(
        &self,
        ctx: &SessionContext,
        description: &str,
        paths: &[&Path],
        mutate: impl FnOnce(),
    ) {
        ctx.txn.begin(description, None);
        for path in paths {
            ctx.txn.backup(path).expect("backup");
        }
        mutate();
        ctx.txn.commit().expect("commit");
    }
}

impl Default for TestSpace {
    fn default() -> Self {
        Self::new()
    }
}
