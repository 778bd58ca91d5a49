// ABOUTME: Host key fingerprint computation.
// ABOUTME: SHA256 over the key's SSH wire encoding, pinned as opaque lowercase hex.

use crate::error::{Result, SshError};
use sha2::{Digest, Sha256};
use ssh_key::PublicKey;

/// Compute the fingerprint of a host public key (hex encoded, lowercase).
///
/// The input to the hash is the key's SSH wire encoding (algorithm name
/// as a length-prefixed string followed by the algorithm-specific key
/// data), so any host key type works. The result is pinned per server
/// and compared byte-for-byte on later connections; nothing parses it
/// back.
///
/// # Returns
/// A 64-character lowercase hex string representing the SHA256 hash.
///
/// # Errors
/// Returns an error if the key cannot be wire-encoded.
pub fn host_key_fingerprint(public_key: &PublicKey) -> Result<String> {
    let wire_data = public_key
        .to_bytes()
        .map_err(|e| SshError::ParseHostKey {
            host: String::new(),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    hasher.update(&wire_data);
    let hash = hasher.finalize();

    Ok(hex::encode(hash))
}

/// Parse one `ssh-keyscan` output line (`<host> <algo> <base64>`) and
/// fingerprint the key it carries.
///
/// # Errors
/// Returns `HostKeyUnavailable` for comment/empty lines and
/// `ParseHostKey` for undecodable key material.
pub fn fingerprint_keyscan_line(host: &str, line: &str) -> Result<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Err(SshError::HostKeyUnavailable {
            host: host.to_string(),
        });
    }
    // Drop the leading hostname field; the remainder is a public key line.
    let key_part = match line.split_once(' ') {
        Some((_, rest)) => rest,
        None => {
            return Err(SshError::HostKeyUnavailable {
                host: host.to_string(),
            })
        }
    };
    let public_key =
        PublicKey::from_openssh(key_part).map_err(|e| SshError::ParseHostKey {
            host: host.to_string(),
            source: e,
        })?;
    host_key_fingerprint(&public_key)
}
