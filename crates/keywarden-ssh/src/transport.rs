// ABOUTME: Transport capability traits consumed by the sync engine.
// ABOUTME: Connection/exec/file-transfer seams with no protocol details.

use crate::error::Result;
use async_trait::async_trait;

/// Output of a remote command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit status; `None` when the remote side died without one.
    pub status: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Basic metadata for a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
}

/// Something that can open SSH connections to managed hosts.
///
/// The sync engine never touches wire details; it consumes this
/// capability and the two below. Implementations: [`crate::OpenSshTransport`]
/// over the system client, and scripted mocks in the sync test suite.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection. Must fail rather than hang forever; the
    /// caller additionally bounds the connect window with a deadline.
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Connection>>;
}

/// An established (not yet necessarily authenticated) connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Fingerprint of the host key presented by the remote side.
    async fn host_fingerprint(&self) -> Result<String>;

    /// Public-key authentication with the transport's fixed identity.
    ///
    /// # Errors
    /// Returns `SshError::AuthenticationFailed` when the remote rejects
    /// the username/key combination.
    async fn authenticate(&mut self, username: &str) -> Result<()>;

    /// Run a command on the remote host. Requires prior authentication.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Open the file-transfer channel. Requires prior authentication.
    async fn open_files(&self) -> Result<Box<dyn FileChannel>>;
}

/// Remote file operations on an authenticated connection.
#[async_trait]
pub trait FileChannel: Send + Sync {
    /// Metadata for a path, or `None` if it does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>>;

    /// Read a file's contents.
    ///
    /// # Errors
    /// Returns `SshError::FileNotFound` for missing paths.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file's contents, creating it with the given mode.
    async fn write(&self, path: &str, data: &[u8], mode: u32) -> Result<()>;

    /// Delete a file.
    async fn remove(&self, path: &str) -> Result<()>;
}

/// Quote an argument for inclusion in a remote shell command line.
///
/// Single-quote wrapping with embedded quotes broken out, the POSIX way.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput {
            status: Some(0),
            ..Default::default()
        };
        let failed = ExecOutput {
            status: Some(1),
            ..Default::default()
        };
        let died = ExecOutput {
            status: None,
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!died.success());
    }

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("deploy"), "'deploy'");
    }

    #[test]
    fn test_shell_quote_spaces_and_globs() {
        assert_eq!(shell_quote("a b*"), "'a b*'");
    }

    #[test]
    fn test_shell_quote_embedded_single_quote() {
        assert_eq!(shell_quote("o'brien"), "'o'\\''brien'");
    }
}
