//! `nts` — read-only inspection of session state.
//!
//! The mutating surface (edits, undo, transactions) belongs to the RPC
//! layer that embeds this crate; the binary exists to let a human look at
//! what a session has been doing: which sessions exist, what their
//! journals hold, and what happened to a particular file.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::journal::{JournalEntry, Stack};
use crate::model::types::SessionId;
use crate::session::{SessionMetadata, SessionRegistry};

/// Output rendering for inspection commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON envelopes.
    Json,
}

/// Inspect NTS session state.
#[derive(Debug, Parser)]
#[command(name = "nts", version, about)]
pub struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Inspection subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List sessions persisted under `.nts/sessions/`.
    Sessions,
    /// Show a session's journal (undo and redo stacks).
    Journal {
        /// The session to inspect.
        session: String,
        /// Show at most this many entries per stack.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the change history of one file in a session.
    History {
        /// The session to inspect.
        session: String,
        /// The file path (absolute, or relative to the root).
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SessionsEnvelope {
    sessions: Vec<SessionMetadata>,
}

#[derive(Serialize)]
struct JournalEnvelope {
    session: String,
    undo: Vec<JournalEntry>,
    redo: Vec<JournalEntry>,
    total_edits: i64,
    total_undos: i64,
}

#[derive(Serialize)]
struct HistoryEnvelope {
    session: String,
    path: PathBuf,
    entries: Vec<JournalEntry>,
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Run an inspection command against the global registry.
pub fn run(command: &Command, format: OutputFormat) -> Result<()> {
    match command {
        Command::Sessions => sessions(format),
        Command::Journal { session, limit } => journal(session, *limit, format),
        Command::History { session, path } => history(session, path, format),
    }
}

fn sessions(format: OutputFormat) -> Result<()> {
    let registry = SessionRegistry::global();
    let mut sessions = Vec::new();
    for id in registry.list_on_disk() {
        let id = SessionId::new(&id).with_context(|| format!("bad session directory '{id}'"))?;
        sessions.push(registry.metadata(&id)?);
    }
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&SessionsEnvelope { sessions })?);
        }
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No persisted sessions found.");
                return Ok(());
            }
            for meta in sessions {
                println!(
                    "{:24} created {}  last active {}{}",
                    meta.session_id,
                    meta.created.format("%Y-%m-%d %H:%M"),
                    meta.last_activity.format("%Y-%m-%d %H:%M"),
                    meta.active_todo
                        .as_deref()
                        .map(|t| format!("  todo: {t}"))
                        .unwrap_or_default(),
                );
            }
        }
    }
    Ok(())
}

fn journal(session: &str, limit: usize, format: OutputFormat) -> Result<()> {
    let ctx = open_session(session)?;
    let undo = ctx.txn.journal_tail(limit)?;
    let redo = {
        let mut entries = ctx.txn.journal(Stack::Redo)?;
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        entries
    };
    match format {
        OutputFormat::Json => {
            let envelope = JournalEnvelope {
                session: session.to_owned(),
                undo,
                redo,
                total_edits: ctx.txn.total_edits()?,
                total_undos: ctx.txn.total_undos()?,
            };
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => {
            println!("Session '{session}'");
            println!("  undo stack ({} shown):", undo.len());
            for entry in &undo {
                println!("    {}", render_entry(entry));
            }
            println!("  redo stack ({} shown):", redo.len());
            for entry in &redo {
                println!("    {}", render_entry(entry));
            }
            println!(
                "  totals: {} edits, {} undos",
                ctx.txn.total_edits()?,
                ctx.txn.total_undos()?
            );
        }
    }
    Ok(())
}

fn history(session: &str, path: &std::path::Path, format: OutputFormat) -> Result<()> {
    let ctx = open_session(session)?;
    let entries = ctx.txn.file_history(path)?;
    match format {
        OutputFormat::Json => {
            let envelope = HistoryEnvelope {
                session: session.to_owned(),
                path: path.to_path_buf(),
                entries,
            };
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No recorded changes for {} in '{session}'.", path.display());
                return Ok(());
            }
            for entry in &entries {
                println!("{}", render_entry(entry));
            }
        }
    }
    Ok(())
}

fn open_session(session: &str) -> Result<std::sync::Arc<crate::session::SessionContext>> {
    let id = SessionId::new(session).map_err(|e| anyhow::anyhow!("{e}"))?;
    let registry = SessionRegistry::global();
    if !registry.exists_on_disk(&id) && !registry.is_active_in_memory(&id) {
        bail!(
            "session '{session}' not found.\n  Check: nts sessions\n  Next: nts journal <session>"
        );
    }
    registry.reactivate(&id).map_err(|e| anyhow::anyhow!("{e}"))
}

fn render_entry(entry: &JournalEntry) -> String {
    let what = entry
        .checkpoint_name
        .as_ref()
        .map(|n| format!("checkpoint '{n}'"))
        .or_else(|| entry.description.clone())
        .unwrap_or_default();
    format!(
        "#{:<4} {:11} {:9} {}  {}",
        entry.position,
        entry.kind.as_str(),
        entry.status.as_str(),
        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
        what,
    )
}
