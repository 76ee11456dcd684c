//! Project configuration (`.nts.toml`).
//!
//! Optional file at the sandbox's primary root. Absence means defaults; a
//! present-but-broken file is an error (silent fallback would hide typos in
//! the limits that guard memory use).

use std::path::Path;

use serde::Deserialize;

use crate::error::{NtsError, Result};
use crate::sandbox::{DEFAULT_MAX_FILE_BYTES, PathSandbox};

/// Default cap on each journal stack's length.
pub const DEFAULT_JOURNAL_CAP: usize = 50;

/// Default bound on files scanned by a content-hash deep search.
pub const DEFAULT_DEEP_SEARCH_MAX_FILES: usize = 10_000;

/// Configuration from `.nts.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct NtsConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Resource ceilings.
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Largest file the core will read or snapshot, in bytes.
    #[serde(default = "LimitsConfig::default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Maximum entries kept per journal stack; the oldest entry is dropped
    /// beyond this.
    #[serde(default = "LimitsConfig::default_journal_cap")]
    pub journal_cap: usize,
    /// Maximum files hashed during a lost-file deep search.
    #[serde(default = "LimitsConfig::default_deep_search_max_files")]
    pub deep_search_max_files: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            journal_cap: DEFAULT_JOURNAL_CAP,
            deep_search_max_files: DEFAULT_DEEP_SEARCH_MAX_FILES,
        }
    }
}

impl LimitsConfig {
    fn default_max_file_bytes() -> u64 {
        DEFAULT_MAX_FILE_BYTES
    }

    fn default_journal_cap() -> usize {
        DEFAULT_JOURNAL_CAP
    }

    fn default_deep_search_max_files() -> usize {
        DEFAULT_DEEP_SEARCH_MAX_FILES
    }
}

/// Sandbox policy additions.
#[derive(Debug, Default, Deserialize)]
pub struct SandboxConfig {
    /// Project-specific names added to the built-in protected set.
    #[serde(default)]
    pub protected: Vec<String>,
}

impl NtsConfig {
    /// Load config from `<primary_root>/.nts.toml`; a missing file yields
    /// defaults.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(primary_root: &Path) -> Result<Self> {
        let path = primary_root.join(".nts.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| NtsError::Internal {
            detail: format!("failed to parse {}: {e}", path.display()),
        })
    }

    /// Push the configured policy into a sandbox.
    pub fn apply(&self, sandbox: &PathSandbox) {
        sandbox.set_max_file_bytes(self.limits.max_file_bytes);
        if !self.sandbox.protected.is_empty() {
            sandbox.add_protected_names(self.sandbox.protected.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NtsConfig::load(dir.path()).unwrap();
        assert_eq!(config.limits.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
        assert_eq!(config.limits.journal_cap, DEFAULT_JOURNAL_CAP);
        assert!(config.sandbox.protected.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".nts.toml"),
            "[limits]\nmax_file_bytes = 1024\n",
        )
        .unwrap();
        let config = NtsConfig::load(dir.path()).unwrap();
        assert_eq!(config.limits.max_file_bytes, 1024);
        assert_eq!(config.limits.journal_cap, DEFAULT_JOURNAL_CAP);
    }

    #[test]
    fn broken_file_is_an_error_not_a_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".nts.toml"), "limits = \"nope").unwrap();
        assert!(NtsConfig::load(dir.path()).is_err());
    }

    #[test]
    fn apply_pushes_limits_and_protected_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".nts.toml"),
            "[limits]\nmax_file_bytes = 99\n\n[sandbox]\nprotected = [\"secrets\"]\n",
        )
        .unwrap();
        let config = NtsConfig::load(dir.path()).unwrap();
        let sandbox = PathSandbox::new();
        sandbox.set_root(dir.path().to_path_buf());
        config.apply(&sandbox);
        assert_eq!(sandbox.max_file_bytes(), 99);
        assert!(sandbox.is_protected(Path::new("/x/secrets/key.pem")));
    }
}
