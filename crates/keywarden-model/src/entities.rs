// ABOUTME: Core domain entities: users, groups, servers, accounts, grants, keys
// ABOUTME: Read-only records served by a Directory implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person known to the directory service.
///
/// Users own public keys and can be the source of access grants. The
/// lifecycle of a user is owned by the directory; the sync engine only
/// reads these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Login identifier, unique across the directory.
    pub uid: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Inactive users contribute a comment line instead of key material.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Public keys in authorized_keys line format.
    #[serde(default)]
    pub keys: Vec<PublicKey>,
}

/// A named collection of users, server accounts, and nested groups.
///
/// Membership may be cyclic; consumers must guard traversal with a
/// seen-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name, unique across the directory.
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub members: Vec<EntityRef>,
    /// Access rules granted to this group; inherited by member accounts.
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
}

/// Per-server key management policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyManagement {
    /// Not managed at all.
    None,
    /// Managed by keywarden; participates in sync.
    Keys,
    /// Managed by some other mechanism.
    Other,
    /// Retired host; grants sourced from its accounts render a comment.
    Decommissioned,
}

/// Per-server account authorization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// Only explicit server accounts exist.
    None,
    /// Directory users are authorized automatically.
    AutomaticLdap,
    /// Directory users are authorized only if the OS account already exists.
    ManualLdap,
}

/// A managed host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Stable identifier. Assigned by the directory.
    #[serde(default)]
    pub id: u32,
    pub hostname: String,
    /// Last resolved address, persisted after each sync attempt.
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub key_management: KeyManagement,
    #[serde(default = "default_authorization")]
    pub authorization: Authorization,
    /// Pinned host key fingerprint. Opaque; compared byte-for-byte.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    /// Identity reported by the host itself, refreshed best-effort.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Option prefix applied to every synthesized LDAP-user keyfile line.
    #[serde(default)]
    pub ldap_access_options: Vec<KeyOption>,
    #[serde(default)]
    pub accounts: Vec<ServerAccount>,
}

impl Server {
    pub const DEFAULT_PORT: u16 = 22;

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(Self::DEFAULT_PORT)
    }

    /// Whether directory users are synced in addition to explicit accounts.
    pub fn ldap_authorized(&self) -> bool {
        matches!(
            self.authorization,
            Authorization::AutomaticLdap | Authorization::ManualLdap
        )
    }
}

/// Sync lifecycle of a server account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Requested but not yet approved; excluded from sync.
    Proposed,
    /// Approved for sync.
    Active,
}

/// An OS account on a managed server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAccount {
    /// Remote OS account name; doubles as the keyfile name.
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_sync_status")]
    pub sync_status: SyncStatus,
    /// Public keys owned by the account itself.
    #[serde(default)]
    pub keys: Vec<PublicKey>,
    /// Access rules targeting this account directly.
    #[serde(default)]
    pub grants: Vec<AccessGrant>,
}

/// Source side of an access grant or group membership.
///
/// Grant resolution dispatches on this tag: users contribute their keys,
/// server accounts contribute theirs unless the owning server is
/// decommissioned, and groups expand recursively into their members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    User { uid: String },
    Group { name: String },
    ServerAccount { hostname: String, account: String },
}

impl EntityRef {
    /// Label used in keyfile provenance comments.
    pub fn label(&self) -> String {
        match self {
            EntityRef::User { uid } => uid.clone(),
            EntityRef::Group { name } => format!("{name} group"),
            EntityRef::ServerAccount { hostname, account } => format!("{account}@{hostname}"),
        }
    }
}

/// A rule permitting a source entity key-based access to a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub source: EntityRef,
    /// Uid of the user who created the rule.
    pub granted_by: String,
    pub grant_date: DateTime<Utc>,
    /// authorized_keys option strings prefixed to every key line.
    #[serde(default)]
    pub options: Vec<KeyOption>,
}

/// A single authorized_keys option, e.g. `command="/usr/bin/rsync"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl KeyOption {
    /// Render as it appears in an authorized_keys line. Embedded double
    /// quotes in the value are escaped.
    pub fn render(&self) -> String {
        match &self.value {
            Some(value) => format!("{}=\"{}\"", self.name, value.replace('"', "\\\"")),
            None => self.name.clone(),
        }
    }
}

/// Render a full option prefix: comma-joined options plus a trailing
/// space, or empty when there are no options.
pub fn render_option_prefix(options: &[KeyOption]) -> String {
    if options.is_empty() {
        return String::new();
    }
    let mut prefix = options
        .iter()
        .map(KeyOption::render)
        .collect::<Vec<_>>()
        .join(",");
    prefix.push(' ');
    prefix
}

/// Exportable public key material in authorized_keys line format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey {
    key: String,
}

impl PublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Wire-format line as written into keyfiles.
    pub fn export(&self) -> &str {
        self.key.trim()
    }

    /// Parse-check the key material with the ssh-key crate.
    pub fn validate(&self) -> Result<(), ssh_key::Error> {
        ssh_key::PublicKey::from_openssh(self.key.trim()).map(|_| ())
    }
}

fn default_true() -> bool {
    true
}

fn default_authorization() -> Authorization {
    Authorization::None
}

fn default_sync_status() -> SyncStatus {
    SyncStatus::Active
}
