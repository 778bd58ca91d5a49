// ABOUTME: Error types for SSH operations using thiserror.
// ABOUTME: Typed errors for key loading, connection, auth, exec, and file transfer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during SSH key handling and remote operations.
#[derive(Error, Debug)]
pub enum SshError {
    /// Failed to read a key file from disk.
    #[error("failed to read SSH key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse an SSH key.
    #[error("failed to parse SSH key from {path}: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: ssh_key::Error,
    },

    /// Failed to parse host key material received from a remote.
    #[error("failed to parse host key for {host}: {source}")]
    ParseHostKey {
        host: String,
        #[source]
        source: ssh_key::Error,
    },

    /// The remote did not present a host key.
    #[error("no host key received from {host}")]
    HostKeyUnavailable { host: String },

    /// Transport-level connection failure.
    #[error("connection to {host}:{port} failed: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },

    /// Public key authentication was rejected for a username.
    #[error("authentication as '{username}' failed")]
    AuthenticationFailed { username: String },

    /// Remote command execution failure.
    #[error("remote command failed: {message}")]
    Exec { message: String },

    /// The file-transfer channel could not be opened.
    #[error("file transfer channel failed: {message}")]
    FileChannel { message: String },

    /// A remote file does not exist.
    #[error("remote file not found: {path}")]
    FileNotFound { path: String },

    /// A remote file operation failed.
    #[error("remote file operation on {path} failed: {message}")]
    FileOperation { path: String, message: String },

    /// Failed to spawn a local helper process.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using SshError.
pub type Result<T> = std::result::Result<T, SshError>;
