// ABOUTME: Error types for directory access using thiserror.
// ABOUTME: Typed errors for lookups and snapshot loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur at the data-access boundary.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// No server with the given hostname.
    #[error("hostname '{0}' not found")]
    ServerNotFound(String),

    /// No server with the given id.
    #[error("server id {0} not found")]
    ServerIdNotFound(u32),

    /// Failed to read a directory snapshot from disk.
    #[error("failed to read directory snapshot from {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a directory snapshot.
    #[error("failed to parse directory snapshot from {path}: {source}")]
    SnapshotParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The snapshot contains conflicting records.
    #[error("duplicate {kind} '{name}' in directory snapshot")]
    DuplicateRecord { kind: &'static str, name: String },
}

/// Result type alias using DirectoryError.
pub type Result<T> = std::result::Result<T, DirectoryError>;
