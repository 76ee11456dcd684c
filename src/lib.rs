//! nts — transactional file-editing safety core for LLM code assistants.
//!
//! Every edit a client makes through the tool surface is (a) authorized by
//! a prior read via a line access token, (b) reversible as an atomic
//! multi-file transaction journaled with whole-file snapshots, (c) checked
//! against changes made by external editors, and (d) isolated per session.
//!
//! The crate is a library first; the `nts` binary is a read-only
//! inspection shell over the same state.

pub mod cli;
pub mod config;
pub mod error;
pub mod external;
pub mod hashing;
pub mod journal;
pub mod lineage;
pub mod model;
pub mod sandbox;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod txn;

pub use error::{NtsError, Result};
