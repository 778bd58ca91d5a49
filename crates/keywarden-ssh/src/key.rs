// ABOUTME: Sync service key pair loading.
// ABOUTME: Loads and validates the fixed key pair distributed to managed servers.

use crate::error::{Result, SshError};
use ssh_key::{PrivateKey, PublicKey};
use std::path::{Path, PathBuf};

/// The fixed key pair the sync service authenticates with.
///
/// The private key stays on disk (the transport points OpenSSH at it);
/// the public half is carried in memory because legacy sync appends it
/// to the root keyfile.
#[derive(Debug, Clone)]
pub struct SyncKey {
    private_key_path: PathBuf,
    public_key_line: String,
}

impl SyncKey {
    /// Load the key pair from `<path>` and `<path>.pub`, validating both.
    ///
    /// # Errors
    /// Returns an error if either file cannot be read or parsed.
    pub fn load(private_key_path: impl AsRef<Path>) -> Result<Self> {
        let private_key_path = private_key_path.as_ref().to_path_buf();
        let private_data =
            std::fs::read_to_string(&private_key_path).map_err(|e| SshError::ReadKey {
                path: private_key_path.clone(),
                source: e,
            })?;
        PrivateKey::from_openssh(&private_data).map_err(|e| SshError::ParseKey {
            path: private_key_path.clone(),
            source: e,
        })?;

        let public_key_path = public_path(&private_key_path);
        let public_key_line =
            std::fs::read_to_string(&public_key_path).map_err(|e| SshError::ReadKey {
                path: public_key_path.clone(),
                source: e,
            })?;
        PublicKey::from_openssh(public_key_line.trim()).map_err(|e| SshError::ParseKey {
            path: public_key_path,
            source: e,
        })?;

        Ok(Self {
            private_key_path,
            public_key_line: public_key_line.trim().to_string(),
        })
    }

    /// Path handed to the transport for authentication.
    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    /// Public key in authorized_keys line format, without trailing newline.
    pub fn public_key_line(&self) -> &str {
        &self.public_key_line
    }
}

fn public_path(private_key_path: &Path) -> PathBuf {
    let mut name = private_key_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".pub");
    private_key_path.with_file_name(name)
}
