// ABOUTME: SSH capability boundary for the keywarden sync engine.
// ABOUTME: Key pair loading, host fingerprinting, and transport traits.

//! # keywarden-ssh
//!
//! SSH key handling and the transport seam consumed by keywarden-sync.
//!
//! This crate deliberately contains no sync logic. It provides:
//!
//! - **Key loading**: the fixed sync key pair distributed to all managed
//!   servers ([`SyncKey`]).
//! - **Fingerprinting**: SHA256 host key fingerprints pinned per server
//!   and compared as opaque strings ([`host_key_fingerprint`]).
//! - **Transport traits**: [`Transport`], [`Connection`], and
//!   [`FileChannel`] — the capability boundary the per-server sync
//!   session is written against.
//! - **OpenSSH adapter**: [`OpenSshTransport`], which drives the system
//!   `ssh`/`ssh-keyscan` binaries.
//!
//! ## Example
//!
//! ```no_run
//! use keywarden_ssh::{OpenSshTransport, SyncKey, Transport};
//!
//! # async fn demo() -> keywarden_ssh::Result<()> {
//! let key = SyncKey::load("/etc/keywarden/keys-sync")?;
//! let transport = OpenSshTransport::new(key.private_key_path());
//! let mut conn = transport.connect("web1.example.com", 22).await?;
//! let fingerprint = conn.host_fingerprint().await?;
//! conn.authenticate("keys-sync").await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod fingerprint;
mod key;
mod openssh;
mod transport;

pub use error::{Result, SshError};
pub use fingerprint::{fingerprint_keyscan_line, host_key_fingerprint};
pub use key::SyncKey;
pub use openssh::OpenSshTransport;
pub use transport::{shell_quote, Connection, ExecOutput, FileChannel, FileStat, Transport};
