// ABOUTME: Fleet sync engine: access resolution through per-server reconciliation
// ABOUTME: Graph, keyfile rendering, planner, bounded worker pool, session

//! # keywarden-sync
//!
//! The synchronization core. Given a directory of users, groups, and
//! access grants, it resolves effective key access per server account,
//! renders authorized-keys files with provenance comments, and
//! reconciles each managed server against the desired state over an
//! injected SSH transport:
//!
//! - [`AccessGraph`] — recursive, cycle-safe access resolution.
//! - [`KeyFileBuilder`] — keyfile bytes, LDAP user synthesis.
//! - [`SyncPlanner`] / [`WorkerPool`] — target selection and bounded
//!   concurrent fan-out with completion-order output.
//! - [`ServerSyncSession`] — the per-server state machine: resolve,
//!   connect, verify host identity, authenticate, diff, apply, clean
//!   up, finalize, report.
//!
//! Failure semantics are layered: one account's error never aborts its
//! siblings, one server's error never aborts the fleet, and every
//! enumerated failure converts to a structured [`keywarden_model::SyncOutcome`].

mod config;
mod graph;
mod keyfile;
mod pool;
mod resolve;
mod session;

pub use config::{SyncConfig, DEFAULT_MAX_WORKERS};
pub use graph::{AccessGraph, Entry, Provenance};
pub use keyfile::{KeyFile, KeyFileBuilder};
pub use pool::{SyncPlanner, TargetSelection, WorkerPool};
pub use resolve::{DnsResolver, Resolver, StaticResolver};
pub use session::{ServerSyncSession, SessionOptions, SessionResult, SyncContext};
