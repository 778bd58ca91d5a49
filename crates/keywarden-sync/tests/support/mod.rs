// ABOUTME: Shared test support: scripted mock transport and fixtures
// ABOUTME: In-memory remote hosts with counters for writes, removes, connects

// Each test binary links this module separately; not every binary uses
// every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use keywarden_model::{
    AccessGrant, Authorization, DirectorySnapshot, EntityRef, InMemoryDirectory, KeyManagement,
    MemoryReports, PublicKey, Server, ServerAccount, SyncStatus, User,
};
use keywarden_ssh::{
    Connection, ExecOutput, FileChannel, FileStat, Result as SshResult, SshError, Transport,
};
use keywarden_sync::{StaticResolver, SyncConfig, SyncContext};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEY_DIR: &str = "/var/local/keys-sync";

/// A valid ed25519 public key line for fixtures.
pub const ALICE_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f alice@laptop";
pub const CAROL_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcH carol@desk";

/// Scripted state of one fake remote host.
pub struct MockRemote {
    pub fingerprint: String,
    pub auth_users: Vec<String>,
    pub dirs: HashSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub existing_accounts: HashSet<String>,
    pub connect_fails: bool,
    pub connect_delay: Option<Duration>,
    pub fail_writes: bool,
    pub fail_removes: bool,
    // observed behavior
    pub connects: usize,
    pub writes: usize,
    pub removes: usize,
    pub logins: Vec<String>,
    pub execs: Vec<String>,
}

impl Default for MockRemote {
    fn default() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(KEY_DIR.to_string());
        Self {
            fingerprint: "feedface".repeat(8),
            auth_users: vec!["keys-sync".to_string()],
            dirs,
            files: BTreeMap::new(),
            existing_accounts: HashSet::new(),
            connect_fails: false,
            connect_delay: None,
            fail_writes: false,
            fail_removes: false,
            connects: 0,
            writes: 0,
            removes: 0,
            logins: Vec::new(),
            execs: Vec::new(),
        }
    }
}

impl MockRemote {
    /// Seed a file under the key directory.
    pub fn with_key_file(mut self, name: &str, content: &str) -> Self {
        self.files
            .insert(format!("{KEY_DIR}/{name}"), content.as_bytes().to_vec());
        self
    }

    pub fn key_file(&self, name: &str) -> Option<String> {
        self.files
            .get(&format!("{KEY_DIR}/{name}"))
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }
}

#[derive(Default)]
struct ConnectionGauge {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct GaugeGuard(Arc<ConnectionGauge>);

impl GaugeGuard {
    fn enter(gauge: &Arc<ConnectionGauge>) -> Self {
        let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.max_active.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Transport over a table of scripted hosts.
#[derive(Default)]
pub struct MockTransport {
    remotes: Mutex<HashMap<String, Arc<Mutex<MockRemote>>>>,
    gauge: Arc<ConnectionGauge>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, hostname: &str, remote: MockRemote) -> Arc<Mutex<MockRemote>> {
        let remote = Arc::new(Mutex::new(remote));
        self.remotes
            .lock()
            .expect("lock should not be poisoned")
            .insert(hostname.to_string(), Arc::clone(&remote));
        remote
    }

    /// Highest number of simultaneously live connections observed.
    pub fn max_active_connections(&self) -> usize {
        self.gauge.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, host: &str, port: u16) -> SshResult<Box<dyn Connection>> {
        let remote = self
            .remotes
            .lock()
            .expect("lock should not be poisoned")
            .get(host)
            .cloned()
            .ok_or_else(|| SshError::Connect {
                host: host.to_string(),
                port,
                message: "unknown host".to_string(),
            })?;

        let guard = GaugeGuard::enter(&self.gauge);
        let delay = remote
            .lock()
            .expect("lock should not be poisoned")
            .connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = remote.lock().expect("lock should not be poisoned");
            state.connects += 1;
            if state.connect_fails {
                return Err(SshError::Connect {
                    host: host.to_string(),
                    port,
                    message: "connection refused".to_string(),
                });
            }
        }

        Ok(Box::new(MockConnection {
            remote,
            authenticated: false,
            _gauge: guard,
        }))
    }
}

struct MockConnection {
    remote: Arc<Mutex<MockRemote>>,
    authenticated: bool,
    _gauge: GaugeGuard,
}

#[async_trait]
impl Connection for MockConnection {
    async fn host_fingerprint(&self) -> SshResult<String> {
        Ok(self
            .remote
            .lock()
            .expect("lock should not be poisoned")
            .fingerprint
            .clone())
    }

    async fn authenticate(&mut self, username: &str) -> SshResult<()> {
        let mut state = self.remote.lock().expect("lock should not be poisoned");
        if state.auth_users.iter().any(|u| u == username) {
            state.logins.push(username.to_string());
            self.authenticated = true;
            Ok(())
        } else {
            Err(SshError::AuthenticationFailed {
                username: username.to_string(),
            })
        }
    }

    async fn exec(&self, command: &str) -> SshResult<ExecOutput> {
        let mut state = self.remote.lock().expect("lock should not be poisoned");
        state.execs.push(command.to_string());

        if let Some(rest) = command.strip_prefix("/usr/bin/sha256sum '") {
            let dir = rest.strip_suffix("'/*").unwrap_or(rest);
            let prefix = format!("{dir}/");
            let stdout: String = state
                .files
                .iter()
                .filter(|(path, _)| path.starts_with(&prefix))
                .map(|(path, data)| {
                    format!("{}  {}\n", hex::encode(Sha256::digest(data)), path)
                })
                .collect();
            return Ok(ExecOutput {
                stdout,
                stderr: String::new(),
                status: Some(0),
            });
        }

        if let Some(rest) = command.strip_prefix("id '") {
            let name = rest.strip_suffix('\'').unwrap_or(rest);
            return if state.existing_accounts.contains(name) {
                Ok(ExecOutput {
                    stdout: format!("uid=1000({name}) gid=1000({name})\n"),
                    stderr: String::new(),
                    status: Some(0),
                })
            } else {
                Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("id: '{name}': no such user\n"),
                    status: Some(1),
                })
            };
        }

        // chown, true, and anything else scripted as success
        Ok(ExecOutput {
            stdout: String::new(),
            stderr: String::new(),
            status: Some(0),
        })
    }

    async fn open_files(&self) -> SshResult<Box<dyn FileChannel>> {
        if !self.authenticated {
            return Err(SshError::FileChannel {
                message: "not authenticated".to_string(),
            });
        }
        Ok(Box::new(MockFiles {
            remote: Arc::clone(&self.remote),
        }))
    }
}

struct MockFiles {
    remote: Arc<Mutex<MockRemote>>,
}

#[async_trait]
impl FileChannel for MockFiles {
    async fn stat(&self, path: &str) -> SshResult<Option<FileStat>> {
        let state = self.remote.lock().expect("lock should not be poisoned");
        if state.dirs.contains(path) {
            Ok(Some(FileStat { is_dir: true }))
        } else if state.files.contains_key(path) {
            Ok(Some(FileStat { is_dir: false }))
        } else {
            Ok(None)
        }
    }

    async fn read(&self, path: &str) -> SshResult<Vec<u8>> {
        let state = self.remote.lock().expect("lock should not be poisoned");
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SshError::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn write(&self, path: &str, data: &[u8], _mode: u32) -> SshResult<()> {
        let mut state = self.remote.lock().expect("lock should not be poisoned");
        if state.fail_writes {
            return Err(SshError::FileOperation {
                path: path.to_string(),
                message: "disk full".to_string(),
            });
        }
        state.files.insert(path.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }

    async fn remove(&self, path: &str) -> SshResult<()> {
        let mut state = self.remote.lock().expect("lock should not be poisoned");
        if state.fail_removes {
            return Err(SshError::FileOperation {
                path: path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        if state.files.remove(path).is_none() {
            return Err(SshError::FileNotFound {
                path: path.to_string(),
            });
        }
        state.removes += 1;
        Ok(())
    }
}

// ---- directory fixtures ----

pub fn user(uid: &str, active: bool, keys: &[&str]) -> User {
    User {
        uid: uid.to_string(),
        name: String::new(),
        active,
        keys: keys.iter().map(|k| PublicKey::new(*k)).collect(),
    }
}

pub fn account(name: &str, grants: Vec<AccessGrant>) -> ServerAccount {
    ServerAccount {
        name: name.to_string(),
        active: true,
        sync_status: SyncStatus::Active,
        keys: vec![],
        grants,
    }
}

pub fn user_grant(uid: &str) -> AccessGrant {
    AccessGrant {
        source: EntityRef::User {
            uid: uid.to_string(),
        },
        granted_by: "admin".to_string(),
        grant_date: "2024-01-15T09:30:00Z".parse().expect("should parse date"),
        options: vec![],
    }
}

pub fn server(id: u32, hostname: &str, accounts: Vec<ServerAccount>) -> Server {
    Server {
        id,
        hostname: hostname.to_string(),
        ip_address: None,
        port: None,
        key_management: KeyManagement::Keys,
        authorization: Authorization::None,
        host_key_fingerprint: None,
        uuid: None,
        ldap_access_options: vec![],
        accounts,
    }
}

pub fn directory(
    users: Vec<User>,
    groups: Vec<keywarden_model::Group>,
    servers: Vec<Server>,
) -> Arc<InMemoryDirectory> {
    Arc::new(
        InMemoryDirectory::new(DirectorySnapshot {
            users,
            groups,
            servers,
        })
        .expect("should build directory"),
    )
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        base_url: Some("https://keywarden.example.com".to_string()),
        connect_timeout_secs: 5,
        ..SyncConfig::default()
    }
}

/// Bundle fixture handles into a ready-to-run context.
pub struct Harness {
    pub directory: Arc<InMemoryDirectory>,
    pub reports: Arc<MemoryReports>,
    pub transport: Arc<MockTransport>,
    pub ctx: SyncContext,
}

pub fn harness(directory: Arc<InMemoryDirectory>, resolver: StaticResolver) -> Harness {
    let reports = Arc::new(MemoryReports::new());
    let transport = Arc::new(MockTransport::new());
    let ctx = SyncContext {
        directory: directory.clone(),
        reports: reports.clone(),
        transport: transport.clone(),
        resolver: Arc::new(resolver),
        config: Arc::new(test_config()),
        sync_public_key: "ssh-ed25519 AAAA keys-sync@keywarden".to_string(),
    };
    Harness {
        directory,
        reports,
        transport,
        ctx,
    }
}
