//! Error types for the NTS editing core.
//!
//! Defines [`NtsError`], the unified error type for sandbox, token, journal,
//! and transaction operations. Error messages are designed to be
//! agent-friendly: each variant includes a clear description of what went
//! wrong and actionable guidance on how to fix it, and every variant carries
//! a stable machine-readable [`code`](NtsError::code) plus a context map for
//! the RPC layer.
//!
//! Smart-undo outcomes (partial restores, stuck entries) are *results*, not
//! errors — see [`crate::txn::restore`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::model::types::ValidationError;

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, NtsError>;

// ---------------------------------------------------------------------------
// NtsError
// ---------------------------------------------------------------------------

/// Unified error type for NTS core operations.
///
/// Each variant is designed to be self-contained: an agent receiving this
/// error should be able to understand what happened and what to do next
/// without additional context.
#[derive(Debug)]
pub enum NtsError {
    /// A path resolved outside every authorized sandbox root.
    PathOutsideRoots {
        /// The normalized path that was rejected.
        path: PathBuf,
        /// The roots that were authorized at the time of the check.
        roots: Vec<PathBuf>,
    },

    /// A path contains a protected infrastructure segment.
    PathProtected {
        /// The offending path.
        path: PathBuf,
        /// The protected segment that matched.
        segment: String,
    },

    /// A file exceeds the configured size ceiling.
    FileTooLarge {
        /// The offending path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },

    /// A write was attempted without presenting a line access token.
    TokenRequired {
        /// The path the write targeted.
        path: PathBuf,
    },

    /// A token string could not be decoded.
    TokenInvalidFormat {
        /// The raw token text (truncated for display).
        token: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A token was presented against a different path than it was issued for.
    TokenPathMismatch {
        /// The path the token was issued for.
        expected: PathBuf,
        /// The path the caller targeted.
        actual: PathBuf,
    },

    /// A requested line range is malformed.
    TokenRangeMismatch {
        /// 1-based start line of the request.
        start: u32,
        /// 1-based end line of the request.
        end: u32,
        /// Why the range is invalid.
        reason: String,
    },

    /// A token no longer matches the file (line count or checksum drift).
    TokenExpired {
        /// The path the token covers.
        path: PathBuf,
        /// What drifted: line count or range checksum.
        detail: String,
    },

    /// The file changed outside the session since the token was issued.
    TokenExternalChange {
        /// The path that changed.
        path: PathBuf,
    },

    /// The file changed on disk underneath an active transaction.
    ValidationFailed {
        /// The path whose content no longer matches the last known state.
        path: PathBuf,
        /// Human-readable description of the mismatch.
        detail: String,
    },

    /// An operation requires an active transaction and none is open on this
    /// thread.
    TransactionRequired {
        /// The operation that was attempted.
        operation: String,
    },

    /// The journal database failed.
    Journal {
        /// Human-readable description of the failure.
        detail: String,
    },

    /// A session was addressed that exists neither in memory nor on disk.
    SessionNotFound {
        /// The session identifier.
        id: String,
    },

    /// A value failed newtype validation (session ID, token field, …).
    Validation(ValidationError),

    /// An I/O error occurred during a core operation.
    Io(std::io::Error),

    /// Invariant violation. When raised mid-transaction the transaction has
    /// been rolled back if rollback was still possible; a rollback failure
    /// leaves the workspace in an unknown state and says so.
    Internal {
        /// What went wrong.
        detail: String,
    },
}

impl NtsError {
    /// Stable machine-readable code for the RPC error surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::PathOutsideRoots { .. } => "PATH_OUTSIDE_ROOTS",
            Self::PathProtected { .. } => "PATH_PROTECTED",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::TokenRequired { .. } => "TOKEN_REQUIRED",
            Self::TokenInvalidFormat { .. } => "TOKEN_INVALID_FORMAT",
            Self::TokenPathMismatch { .. } => "TOKEN_PATH_MISMATCH",
            Self::TokenRangeMismatch { .. } => "TOKEN_RANGE_MISMATCH",
            Self::TokenExpired { .. } => "TOKEN_EXPIRED",
            Self::TokenExternalChange { .. } => "TOKEN_EXTERNAL_CHANGE",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::TransactionRequired { .. } => "TRANSACTION_REQUIRED",
            Self::Journal { .. } => "JOURNAL_ERROR",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::Validation(_) => "INVALID_ARGUMENT",
            Self::Io(_) => "IO_ERROR",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Context map surfaced alongside the code on the RPC error surface.
    #[must_use]
    pub fn context(&self) -> BTreeMap<&'static str, String> {
        let mut ctx = BTreeMap::new();
        match self {
            Self::PathOutsideRoots { path, roots } => {
                ctx.insert("path", path.display().to_string());
                ctx.insert(
                    "roots",
                    roots
                        .iter()
                        .map(|r| r.display().to_string())
                        .collect::<Vec<_>>()
                        .join(":"),
                );
            }
            Self::PathProtected { path, segment } => {
                ctx.insert("path", path.display().to_string());
                ctx.insert("segment", segment.clone());
            }
            Self::FileTooLarge { path, size, limit } => {
                ctx.insert("path", path.display().to_string());
                ctx.insert("size", size.to_string());
                ctx.insert("limit", limit.to_string());
            }
            Self::TokenRequired { path } | Self::TokenExternalChange { path } => {
                ctx.insert("path", path.display().to_string());
            }
            Self::TokenInvalidFormat { token, reason } => {
                ctx.insert("token", token.clone());
                ctx.insert("reason", reason.clone());
            }
            Self::TokenPathMismatch { expected, actual } => {
                ctx.insert("expected", expected.display().to_string());
                ctx.insert("actual", actual.display().to_string());
            }
            Self::TokenRangeMismatch { start, end, reason } => {
                ctx.insert("start", start.to_string());
                ctx.insert("end", end.to_string());
                ctx.insert("reason", reason.clone());
            }
            Self::TokenExpired { path, detail } | Self::ValidationFailed { path, detail } => {
                ctx.insert("path", path.display().to_string());
                ctx.insert("detail", detail.clone());
            }
            Self::TransactionRequired { operation } => {
                ctx.insert("operation", operation.clone());
            }
            Self::Journal { detail } | Self::Internal { detail } => {
                ctx.insert("detail", detail.clone());
            }
            Self::SessionNotFound { id } => {
                ctx.insert("session", id.clone());
            }
            Self::Validation(err) => {
                ctx.insert("value", err.value.clone());
                ctx.insert("reason", err.reason.clone());
            }
            Self::Io(err) => {
                ctx.insert("detail", err.to_string());
            }
        }
        ctx
    }
}

// ---------------------------------------------------------------------------
// Display — agent-friendly error messages
// ---------------------------------------------------------------------------

impl fmt::Display for NtsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathOutsideRoots { path, roots } => {
                write!(
                    f,
                    "path '{}' resolves outside every authorized root.\n  Authorized roots:",
                    path.display()
                )?;
                for root in roots {
                    write!(f, "\n    {}", root.display())?;
                }
                write!(
                    f,
                    "\n  To fix: target a path inside an authorized root, or grant access to its directory."
                )
            }
            Self::PathProtected { path, segment } => {
                write!(
                    f,
                    "path '{}' touches protected infrastructure ('{segment}').\n  To fix: protected names hold VCS metadata and session state; edit project files instead.",
                    path.display()
                )
            }
            Self::FileTooLarge { path, size, limit } => {
                write!(
                    f,
                    "file '{}' is {size} bytes, above the {limit}-byte ceiling.\n  To fix: read the file in ranges, or raise limits.max_file_bytes in .nts.toml.",
                    path.display()
                )
            }
            Self::TokenRequired { path } => {
                write!(
                    f,
                    "no line access token presented for '{}'.\n  To fix: read the target range first; the read returns the token that authorizes the edit.",
                    path.display()
                )
            }
            Self::TokenInvalidFormat { token, reason } => {
                write!(
                    f,
                    "malformed line access token '{token}': {reason}.\n  To fix: pass the token exactly as returned by the read tool."
                )
            }
            Self::TokenPathMismatch { expected, actual } => {
                write!(
                    f,
                    "token was issued for '{}' but presented against '{}'.\n  To fix: read the target file to obtain its own token.",
                    expected.display(),
                    actual.display()
                )
            }
            Self::TokenRangeMismatch { start, end, reason } => {
                write!(
                    f,
                    "invalid line range {start}..{end}: {reason}.\n  To fix: line numbers are 1-based and start must not exceed end."
                )
            }
            Self::TokenExpired { path, detail } => {
                write!(
                    f,
                    "token for '{}' is stale: {detail}.\n  To fix: re-read the range to obtain a fresh token.",
                    path.display()
                )
            }
            Self::TokenExternalChange { path } => {
                write!(
                    f,
                    "'{}' was modified outside this session since the token was issued.\n  To fix: re-read the file; the external change has been journaled.",
                    path.display()
                )
            }
            Self::ValidationFailed { path, detail } => {
                write!(
                    f,
                    "'{}' changed on disk under the active transaction: {detail}.\n  To fix: the transaction was rolled back; re-read and retry.",
                    path.display()
                )
            }
            Self::TransactionRequired { operation } => {
                write!(
                    f,
                    "'{operation}' requires an active transaction on this thread.\n  To fix: begin a transaction before mutating files."
                )
            }
            Self::Journal { detail } => {
                write!(
                    f,
                    "journal store failure: {detail}.\n  To fix: file contents are intact; the undo history for this session may be degraded."
                )
            }
            Self::SessionNotFound { id } => {
                write!(
                    f,
                    "session '{id}' does not exist in memory or on disk.\n  To fix: list sessions with `nts sessions`."
                )
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
            Self::Internal { detail } => {
                write!(f, "internal error: {detail}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for NtsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for NtsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ValidationError> for NtsError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<rusqlite::Error> for NtsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Journal {
            detail: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
