//! Path sandbox: root-set authorization and protected-name policy.
//!
//! Process-wide policy enforcing that every path the tool surface touches
//! resolves inside one of a dynamically-updatable set of root directories,
//! and that designated infrastructure names (VCS metadata, build artifacts,
//! the `.nts` session directory itself) are never writable.
//!
//! Readers see a copy-on-write snapshot of the root set; updating roots
//! never blocks a reader mid-check. When a path falls outside every root,
//! the sandbox may invoke a registered refresh hook — rate-limited to once
//! per five seconds — asking the hosting layer to grant additional roots,
//! and then retries the check once.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{NtsError, Result};

/// Minimum spacing between two refresh-hook invocations.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default ceiling on file sizes handled by the core (10 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Infrastructure names that are never writable through the tool surface.
const PROTECTED_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".jj",
    ".nts",
    "node_modules",
    "target",
    ".gradle",
    ".idea",
];

/// Hook invoked when a path falls outside every authorized root. The hosting
/// layer is expected to (possibly) call [`PathSandbox::add_root`] before
/// returning. The hook is called with no sandbox lock held and must not
/// re-register itself.
pub type RefreshHook = Box<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// PathSandbox
// ---------------------------------------------------------------------------

struct SandboxState {
    /// Authorized roots; the first entry is the primary root used to resolve
    /// relative paths.
    roots: Vec<PathBuf>,
    protected: BTreeSet<String>,
    max_file_bytes: u64,
}

struct RefreshState {
    hook: Option<RefreshHook>,
    last: Option<Instant>,
}

/// Root-set and protected-name policy governing every path resolution.
pub struct PathSandbox {
    state: RwLock<Arc<SandboxState>>,
    refresh: Mutex<RefreshState>,
}

impl std::fmt::Debug for PathSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSandbox").finish_non_exhaustive()
    }
}

static GLOBAL: LazyLock<Arc<PathSandbox>> = LazyLock::new(|| Arc::new(PathSandbox::new()));

impl Default for PathSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl PathSandbox {
    /// A sandbox with no authorized roots and the default protected set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(SandboxState {
                roots: Vec::new(),
                protected: PROTECTED_NAMES.iter().map(|s| (*s).to_owned()).collect(),
                max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            })),
            refresh: Mutex::new(RefreshState {
                hook: None,
                last: None,
            }),
        }
    }

    /// The process-wide sandbox instance.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    // -- root set -----------------------------------------------------------

    /// Replace the authorized root set. The first entry becomes the primary
    /// root used to resolve relative paths.
    pub fn set_roots<I>(&self, roots: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let normalized: Vec<PathBuf> = roots.into_iter().map(|r| normalize_lexical(&r)).collect();
        self.update(|state| state.roots = normalized.clone());
        debug!(roots = self.roots().len(), "sandbox roots replaced");
    }

    /// Replace the root set with a single root.
    pub fn set_root(&self, root: PathBuf) {
        self.set_roots([root]);
    }

    /// Add one root to the authorized set, keeping the existing primary.
    pub fn add_root(&self, root: PathBuf) {
        let root = normalize_lexical(&root);
        self.update(|state| {
            if !state.roots.contains(&root) {
                state.roots.push(root.clone());
            }
        });
    }

    /// Snapshot of the authorized roots.
    #[must_use]
    pub fn roots(&self) -> Vec<PathBuf> {
        self.snapshot().roots.clone()
    }

    /// The primary root, if any roots are configured.
    #[must_use]
    pub fn primary_root(&self) -> Option<PathBuf> {
        self.snapshot().roots.first().cloned()
    }

    // -- policy configuration ----------------------------------------------

    /// Replace the file-size ceiling.
    pub fn set_max_file_bytes(&self, limit: u64) {
        self.update(|state| state.max_file_bytes = limit);
    }

    /// The current file-size ceiling in bytes.
    #[must_use]
    pub fn max_file_bytes(&self) -> u64 {
        self.snapshot().max_file_bytes
    }

    /// Extend the protected-name set (configuration may add project-specific
    /// names; the built-in set is never removed).
    pub fn add_protected_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let extra: Vec<String> = names.into_iter().map(Into::into).collect();
        self.update(|state| state.protected.extend(extra.iter().cloned()));
    }

    /// Register the hook invoked when a path falls outside every root.
    pub fn set_refresh_hook(&self, hook: RefreshHook) {
        let mut refresh = self.refresh.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        refresh.hook = Some(hook);
        refresh.last = None;
    }

    // -- checks -------------------------------------------------------------

    /// Normalize `requested` and verify it resolves inside an authorized
    /// root. With `allow_protected` false, also reject paths touching a
    /// protected segment.
    ///
    /// # Errors
    /// [`NtsError::PathOutsideRoots`] when no root contains the path even
    /// after a refresh attempt; [`NtsError::PathProtected`] on protected
    /// segments.
    pub fn sanitize(&self, requested: &Path, allow_protected: bool) -> Result<PathBuf> {
        let path = self.absolutize(requested);
        if !self.inside_roots(&path) {
            self.request_more_roots();
            if !self.inside_roots(&path) {
                return Err(NtsError::PathOutsideRoots {
                    path,
                    roots: self.roots(),
                });
            }
        }
        if !allow_protected {
            if let Some(segment) = self.protected_segment(&path) {
                return Err(NtsError::PathProtected { path, segment });
            }
        }
        Ok(path)
    }

    /// Whether any segment of `path` is a protected infrastructure name.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected_segment(path).is_some()
    }

    /// The first protected segment of `path`, if any.
    #[must_use]
    pub fn protected_segment(&self, path: &Path) -> Option<String> {
        let state = self.snapshot();
        for comp in path.components() {
            if let Component::Normal(seg) = comp {
                if let Some(seg) = seg.to_str() {
                    if state.protected.contains(seg) {
                        return Some(seg.to_owned());
                    }
                }
            }
        }
        None
    }

    /// Reject files above the configured size ceiling. Absent files pass.
    ///
    /// # Errors
    /// [`NtsError::FileTooLarge`] when the on-disk size exceeds the ceiling.
    pub fn check_file_size(&self, path: &Path) -> Result<()> {
        let limit = self.max_file_bytes();
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > limit => Err(NtsError::FileTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    // -- path arithmetic ----------------------------------------------------

    /// Normalize, resolving relative paths against the primary root.
    #[must_use]
    pub fn absolutize(&self, requested: &Path) -> PathBuf {
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else if let Some(primary) = self.primary_root() {
            primary.join(requested)
        } else {
            requested.to_path_buf()
        };
        normalize_lexical(&joined)
    }

    /// Express `path` relative to the primary root when possible; used for
    /// journal storage so sessions survive a root directory being relocated.
    #[must_use]
    pub fn relativize(&self, path: &Path) -> PathBuf {
        match self.primary_root() {
            Some(primary) => path
                .strip_prefix(&primary)
                .map_or_else(|_| path.to_path_buf(), Path::to_path_buf),
            None => path.to_path_buf(),
        }
    }

    // -- internals ----------------------------------------------------------

    fn snapshot(&self) -> Arc<SandboxState> {
        Arc::clone(
            &self
                .state
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    fn update(&self, f: impl FnOnce(&mut SandboxState)) {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut next = SandboxState {
            roots: guard.roots.clone(),
            protected: guard.protected.clone(),
            max_file_bytes: guard.max_file_bytes,
        };
        f(&mut next);
        *guard = Arc::new(next);
    }

    fn inside_roots(&self, path: &Path) -> bool {
        self.snapshot().roots.iter().any(|root| path.starts_with(root))
    }

    /// Invoke the refresh hook if one is registered and the rate limit
    /// allows. The hook runs with no sandbox lock held, so it may call
    /// [`add_root`](Self::add_root) or [`set_roots`](Self::set_roots).
    fn request_more_roots(&self) {
        let hook = {
            let mut refresh = self
                .refresh
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if refresh.hook.is_none() {
                return;
            }
            if let Some(last) = refresh.last {
                if last.elapsed() < REFRESH_INTERVAL {
                    return;
                }
            }
            refresh.last = Some(Instant::now());
            refresh.hook.take()
        };
        if let Some(hook) = hook {
            debug!("requesting additional sandbox roots from host");
            hook();
            let mut refresh = self
                .refresh
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // A hook registered during the call wins over the old one.
            if refresh.hook.is_none() {
                refresh.hook = Some(hook);
            }
        }
    }
}

/// Purely lexical normalization: fold `.`, collapse `..` (clamped at the
/// filesystem root), preserve case. No symlink resolution.
#[must_use]
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            // pop() at "/" is a no-op, clamping traversal at the root;
            // excess ".." on a relative path is dropped
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sandbox_with_root(root: &Path) -> PathSandbox {
        let sandbox = PathSandbox::new();
        sandbox.set_root(root.to_path_buf());
        sandbox
    }

    #[test]
    fn normalize_folds_dots_and_duplicate_separators() {
        assert_eq!(
            normalize_lexical(Path::new("/a//b/./c")),
            PathBuf::from("/a/b/c")
        );
        assert_eq!(
            normalize_lexical(Path::new("/a/b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn normalize_clamps_traversal_at_root() {
        assert_eq!(
            normalize_lexical(Path::new("/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn sanitize_accepts_paths_under_a_root() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        let path = sandbox.sanitize(Path::new("/work/src/main.rs"), false).unwrap();
        assert_eq!(path, PathBuf::from("/work/src/main.rs"));
    }

    #[test]
    fn sanitize_resolves_relative_against_primary_root() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        let path = sandbox.sanitize(Path::new("src/lib.rs"), false).unwrap();
        assert_eq!(path, PathBuf::from("/work/src/lib.rs"));
    }

    #[test]
    fn sanitize_rejects_escape_via_parent_dirs() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        let err = sandbox
            .sanitize(Path::new("/work/../etc/passwd"), false)
            .unwrap_err();
        assert_eq!(err.code(), "PATH_OUTSIDE_ROOTS");
    }

    #[test]
    fn sanitize_rejects_unrelated_absolute_paths() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        let err = sandbox.sanitize(Path::new("/tmp/other"), false).unwrap_err();
        assert_eq!(err.code(), "PATH_OUTSIDE_ROOTS");
    }

    #[test]
    fn sanitize_never_returns_protected_paths() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        for p in ["/work/.git/config", "/work/sub/.nts/state", "/work/node_modules/x"] {
            let err = sandbox.sanitize(Path::new(p), false).unwrap_err();
            assert_eq!(err.code(), "PATH_PROTECTED", "{p}");
        }
    }

    #[test]
    fn allow_protected_bypasses_the_name_check_only() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        assert!(sandbox.sanitize(Path::new("/work/.git/HEAD"), true).is_ok());
        assert!(sandbox.sanitize(Path::new("/etc/.git"), true).is_err());
    }

    #[test]
    fn secondary_roots_authorize_their_subtrees() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        sandbox.add_root(PathBuf::from("/deps"));
        assert!(sandbox.sanitize(Path::new("/deps/lib.rs"), false).is_ok());
        // relative paths still resolve against the primary
        assert_eq!(
            sandbox.sanitize(Path::new("x.rs"), false).unwrap(),
            PathBuf::from("/work/x.rs")
        );
    }

    #[test]
    fn refresh_hook_grants_access_and_is_retried_once() {
        let sandbox = Arc::new(PathSandbox::new());
        sandbox.set_root(PathBuf::from("/work"));
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_sandbox = Arc::clone(&sandbox);
        let hook_calls = Arc::clone(&calls);
        sandbox.set_refresh_hook(Box::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            hook_sandbox.add_root(PathBuf::from("/granted"));
        }));

        assert!(sandbox.sanitize(Path::new("/granted/a.txt"), false).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Within the rate-limit window the hook is not invoked again.
        let _ = sandbox.sanitize(Path::new("/elsewhere/b.txt"), false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_size_ceiling_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox_with_root(dir.path());
        sandbox.set_max_file_bytes(8);
        let small = dir.path().join("small.txt");
        let big = dir.path().join("big.txt");
        std::fs::write(&small, b"tiny").unwrap();
        std::fs::write(&big, b"way too large").unwrap();
        assert!(sandbox.check_file_size(&small).is_ok());
        assert_eq!(
            sandbox.check_file_size(&big).unwrap_err().code(),
            "FILE_TOO_LARGE"
        );
        // absent files pass; the size check is not an existence check
        assert!(sandbox.check_file_size(&dir.path().join("gone")).is_ok());
    }

    #[test]
    fn relativize_strips_the_primary_root() {
        let sandbox = sandbox_with_root(Path::new("/work"));
        assert_eq!(
            sandbox.relativize(Path::new("/work/src/a.rs")),
            PathBuf::from("src/a.rs")
        );
        assert_eq!(
            sandbox.relativize(Path::new("/deps/b.rs")),
            PathBuf::from("/deps/b.rs")
        );
    }

    #[test]
    fn empty_root_set_rejects_everything() {
        let sandbox = PathSandbox::new();
        assert!(sandbox.sanitize(Path::new("/anything"), false).is_err());
    }
}
