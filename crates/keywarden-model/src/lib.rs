// ABOUTME: Domain model and data-access boundary for keywarden
// ABOUTME: Entities, Directory trait, snapshot loading, and report sinks

//! # keywarden-model
//!
//! The authoritative user/group/server/access-grant model as the sync
//! engine sees it, plus the two traits that bound it:
//!
//! - [`Directory`] — CRUD-style read access to the model and the few
//!   server fields the engine persists back.
//! - [`ReportSink`] — append-only recording of per-account and
//!   per-server sync outcomes.
//!
//! [`InMemoryDirectory`] is the reference implementation, loadable from
//! a TOML [`DirectorySnapshot`] export.

mod directory;
mod entities;
mod error;
mod report;
mod snapshot;

pub use directory::{find_account, Directory, InMemoryDirectory, ServerUpdate};
pub use entities::{
    render_option_prefix, AccessGrant, Authorization, EntityRef, Group, KeyManagement, KeyOption,
    PublicKey, Server, ServerAccount, SyncStatus, User,
};
pub use error::{DirectoryError, Result};
pub use report::{LogReports, MemoryReports, ReportEntry, ReportSink, SyncOutcome, TeeReports};
pub use snapshot::DirectorySnapshot;

/// Identity used to perform syncs. Never itself a sync target.
pub const SYNC_ACCOUNT: &str = "keys-sync";
