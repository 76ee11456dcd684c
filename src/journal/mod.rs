//! Durable per-session undo/redo journal.

pub mod store;
pub mod types;

pub use store::JournalStore;
pub use types::{EntryKind, EntryStatus, FileSnapshot, JournalEntry, NewEntry, Stack};
