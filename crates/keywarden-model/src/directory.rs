// ABOUTME: Directory trait defining the data-access boundary for sync
// ABOUTME: InMemoryDirectory serves a loaded snapshot with mutable server fields

use crate::entities::{
    EntityRef, Group, KeyManagement, PublicKey, Server, ServerAccount, User,
};
use crate::error::{DirectoryError, Result};
use crate::snapshot::DirectorySnapshot;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Fields the sync engine is allowed to persist on a server record.
///
/// Everything else on a `Server` is read-only from the engine's side.
#[derive(Debug, Clone, Default)]
pub struct ServerUpdate {
    pub ip_address: Option<String>,
    pub host_key_fingerprint: Option<String>,
    pub uuid: Option<String>,
}

impl ServerUpdate {
    pub fn ip_address(ip: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip.into()),
            ..Self::default()
        }
    }

    pub fn fingerprint(fp: impl Into<String>) -> Self {
        Self {
            host_key_fingerprint: Some(fp.into()),
            ..Self::default()
        }
    }

    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Self::default()
        }
    }
}

/// The data-access boundary consumed by the sync engine.
///
/// Implementations serve User/Group/Server records and accept the few
/// mutations the engine performs: persisting discovered server fields,
/// and clearing queued sync requests. All reads return owned values; the
/// backing store is treated as read-only for the duration of a sync pass
/// apart from those mutations.
pub trait Directory: Send + Sync {
    fn list_servers(&self) -> Vec<Server>;

    /// # Errors
    /// Returns `DirectoryError::ServerNotFound` for unknown hostnames.
    fn server_by_hostname(&self, hostname: &str) -> Result<Server>;

    /// # Errors
    /// Returns `DirectoryError::ServerIdNotFound` for unknown ids.
    fn server_by_id(&self, id: u32) -> Result<Server>;

    /// Servers under `keys` management recorded at the given address.
    /// More than one match makes a sync target ambiguous.
    fn servers_at_address(&self, ip: &str) -> Vec<Server>;

    fn list_users(&self) -> Vec<User>;

    fn user_by_uid(&self, uid: &str) -> Option<User>;

    fn list_groups(&self) -> Vec<Group>;

    fn group_by_name(&self, name: &str) -> Option<Group>;

    /// Public keys owned by a grant source. Unresolvable references
    /// yield an empty list, never an error.
    fn public_keys(&self, source: &EntityRef) -> Vec<PublicKey>;

    /// Persist discovered fields on a server record.
    ///
    /// # Errors
    /// Returns `DirectoryError::ServerIdNotFound` for unknown ids.
    fn update_server(&self, id: u32, update: ServerUpdate) -> Result<()>;

    /// Drop any externally queued sync requests for a server.
    fn clear_sync_requests(&self, id: u32);
}

struct State {
    users: Vec<User>,
    groups: Vec<Group>,
    servers: Vec<Server>,
    sync_requests: HashMap<u32, usize>,
}

/// Directory implementation backed by an in-memory snapshot.
///
/// Used by the CLI (loaded from a TOML export) and by tests (built from
/// fixtures). Server-field updates and sync-request bookkeeping mutate
/// the snapshot in place behind a lock.
pub struct InMemoryDirectory {
    state: RwLock<State>,
}

impl InMemoryDirectory {
    /// Build a directory from a snapshot, assigning server ids where the
    /// snapshot left them unset.
    ///
    /// # Errors
    /// Returns `DirectoryError::DuplicateRecord` on conflicting
    /// hostnames, uids, or group names.
    pub fn new(mut snapshot: DirectorySnapshot) -> Result<Self> {
        check_unique("user", snapshot.users.iter().map(|u| u.uid.as_str()))?;
        check_unique("group", snapshot.groups.iter().map(|g| g.name.as_str()))?;
        check_unique(
            "server",
            snapshot.servers.iter().map(|s| s.hostname.as_str()),
        )?;

        let mut next_id = snapshot
            .servers
            .iter()
            .map(|s| s.id)
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        for server in &mut snapshot.servers {
            if server.id == 0 {
                server.id = next_id;
                next_id += 1;
            }
        }

        for user in &snapshot.users {
            warn_invalid_keys(&user.keys, &format!("user '{}'", user.uid));
        }
        for server in &snapshot.servers {
            for account in &server.accounts {
                warn_invalid_keys(
                    &account.keys,
                    &format!("account '{}@{}'", account.name, server.hostname),
                );
            }
        }

        Ok(Self {
            state: RwLock::new(State {
                users: snapshot.users,
                groups: snapshot.groups,
                servers: snapshot.servers,
                sync_requests: HashMap::new(),
            }),
        })
    }

    /// Load a snapshot from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// snapshot contains duplicate records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DirectoryError::SnapshotRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        let snapshot: DirectorySnapshot =
            toml::from_str(&content).map_err(|e| DirectoryError::SnapshotParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::new(snapshot)
    }

    /// Record an external sync request for a server. Test/queue helper.
    pub fn queue_sync_request(&self, id: u32) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state.sync_requests.entry(id).or_insert(0) += 1;
    }

    /// Number of queued sync requests for a server.
    pub fn pending_sync_requests(&self, id: u32) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.sync_requests.get(&id).copied().unwrap_or(0)
    }
}

impl Directory for InMemoryDirectory {
    fn list_servers(&self) -> Vec<Server> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.servers.clone()
    }

    fn server_by_hostname(&self, hostname: &str) -> Result<Server> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .servers
            .iter()
            .find(|s| s.hostname == hostname)
            .cloned()
            .ok_or_else(|| DirectoryError::ServerNotFound(hostname.to_string()))
    }

    fn server_by_id(&self, id: u32) -> Result<Server> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(DirectoryError::ServerIdNotFound(id))
    }

    fn servers_at_address(&self, ip: &str) -> Vec<Server> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .servers
            .iter()
            .filter(|s| {
                s.key_management == KeyManagement::Keys
                    && s.ip_address.as_deref() == Some(ip)
            })
            .cloned()
            .collect()
    }

    fn list_users(&self) -> Vec<User> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.users.clone()
    }

    fn user_by_uid(&self, uid: &str) -> Option<User> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.users.iter().find(|u| u.uid == uid).cloned()
    }

    fn list_groups(&self) -> Vec<Group> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.groups.clone()
    }

    fn group_by_name(&self, name: &str) -> Option<Group> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.groups.iter().find(|g| g.name == name).cloned()
    }

    fn public_keys(&self, source: &EntityRef) -> Vec<PublicKey> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        match source {
            EntityRef::User { uid } => state
                .users
                .iter()
                .find(|u| u.uid == *uid)
                .map(|u| u.keys.clone())
                .unwrap_or_default(),
            EntityRef::ServerAccount { hostname, account } => state
                .servers
                .iter()
                .find(|s| s.hostname == *hostname)
                .and_then(|s| s.accounts.iter().find(|a| a.name == *account))
                .map(|a| a.keys.clone())
                .unwrap_or_default(),
            // Groups own no key material; they expand into members.
            EntityRef::Group { .. } => vec![],
        }
    }

    fn update_server(&self, id: u32, update: ServerUpdate) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let server = state
            .servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DirectoryError::ServerIdNotFound(id))?;
        if let Some(ip) = update.ip_address {
            server.ip_address = Some(ip);
        }
        if let Some(fp) = update.host_key_fingerprint {
            server.host_key_fingerprint = Some(fp);
        }
        if let Some(uuid) = update.uuid {
            server.uuid = Some(uuid);
        }
        Ok(())
    }

    fn clear_sync_requests(&self, id: u32) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.sync_requests.remove(&id);
    }
}

fn check_unique<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(DirectoryError::DuplicateRecord {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn warn_invalid_keys(keys: &[PublicKey], owner: &str) {
    for key in keys {
        if let Err(e) = key.validate() {
            // Broken key material degrades at render time; surface it here
            // once so operators can fix the record.
            tracing::warn!(owner, error = %e, "unparseable public key in directory");
        }
    }
}

/// Convenience accessor: look up a server account by hostname and name.
pub fn find_account(server: &Server, name: &str) -> Option<ServerAccount> {
    server.accounts.iter().find(|a| a.name == name).cloned()
}
