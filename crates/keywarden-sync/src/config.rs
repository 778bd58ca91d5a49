// ABOUTME: Runtime configuration for the sync engine
// ABOUTME: TOML config file with sensible defaults for every field

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default ceiling on concurrently running server sessions.
pub const DEFAULT_MAX_WORKERS: usize = 20;

/// Sync engine configuration.
///
/// Constructed once at startup and shared read-only for the lifetime of
/// the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote directory holding one keyfile per account.
    pub key_dir: String,
    /// Remote path written by the legacy (root-based) sync method.
    pub legacy_key_path: String,
    /// Remote identity marker file, read best-effort after each sync.
    pub uuid_path: String,
    /// Web UI base URL embedded in keyfile headers. Without it the
    /// headers carry no modification link.
    pub base_url: Option<String>,
    /// Path to the sync service private key; `<path>.pub` must exist too.
    pub sync_key_path: PathBuf,
    /// Path to the directory snapshot served to the engine.
    pub directory_path: PathBuf,
    /// Concurrency ceiling for the worker pool.
    pub max_workers: usize,
    /// Deadline covering connect, host key check, and authentication.
    pub connect_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_dir: "/var/local/keys-sync".to_string(),
            legacy_key_path: "/root/.ssh/authorized_keys2".to_string(),
            uuid_path: "/etc/uuid".to_string(),
            base_url: None,
            sync_key_path: PathBuf::from("/etc/keywarden/keys-sync"),
            directory_path: PathBuf::from("/etc/keywarden/directory.toml"),
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout_secs: 60,
        }
    }
}

impl SyncConfig {
    /// Get the XDG config directory for keywarden (~/.config/keywarden)
    pub fn config_dir() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|p| p.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("keywarden")
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load config from the XDG config directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Generate a default config file content
    pub fn default_toml() -> String {
        r#"# keywarden configuration
# Location: ~/.config/keywarden/config.toml

# Remote directory holding one keyfile per account
key_dir = "/var/local/keys-sync"

# Remote path used by the legacy (root-based) sync method
legacy_key_path = "/root/.ssh/authorized_keys2"

# Remote identity marker file
uuid_path = "/etc/uuid"

# Web UI base URL for keyfile header links
# base_url = "https://keywarden.example.com"

# Sync service key pair (private key; <path>.pub alongside)
sync_key_path = "/etc/keywarden/keys-sync"

# Directory snapshot served to the engine
directory_path = "/etc/keywarden/directory.toml"

# Concurrency ceiling for the worker pool
max_workers = 20

# Deadline covering connect, host key check, and authentication
connect_timeout_secs = 60
"#
        .to_string()
    }
}
