// ABOUTME: CLI argument parsing and wiring for the keywarden binary
// ABOUTME: Scope flags, config/directory loading, pool invocation, summary

//! # keywarden-cli
//!
//! The `keywarden` binary syncs public keys to managed hosts:
//!
//! ```text
//! keywarden --all                      # sync every managed host
//! keywarden --host web1,web2           # sync named hosts
//! keywarden --id 42                    # sync one host by id
//! keywarden --all --user deploy        # restrict to one account
//! keywarden --host web1 --preview      # print keyfiles, change nothing
//! ```
//!
//! Exactly one of `--all`, `--host`, `--id` is required. A named
//! hostname that is not in the directory exits non-zero before any sync
//! starts.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use keywarden_model::{
    InMemoryDirectory, LogReports, MemoryReports, ReportEntry, SyncOutcome, TeeReports,
};
use keywarden_ssh::{OpenSshTransport, SyncKey};
use keywarden_sync::{
    DnsResolver, SessionOptions, SyncConfig, SyncContext, SyncPlanner, TargetSelection,
    WorkerPool,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Version of the keywarden CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "keywarden",
    version,
    about = "Syncs public keys to managed hosts",
    group(ArgGroup::new("scope").required(true))
)]
pub struct Cli {
    /// Sync all managed hosts in the directory
    #[arg(short, long, group = "scope")]
    pub all: bool,

    /// Sync only the named host(s), comma-separated
    #[arg(short = 'H', long, group = "scope", value_name = "HOSTNAME")]
    pub host: Option<String>,

    /// Sync only the host with this id
    #[arg(short, long, group = "scope", value_name = "ID")]
    pub id: Option<u32>,

    /// Sync only the named account
    #[arg(short, long, value_name = "ACCOUNT")]
    pub user: Option<String>,

    /// Perform no changes, display content of all keyfiles
    #[arg(short, long)]
    pub preview: bool,

    /// Config file path (default: ~/.config/keywarden/config.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory snapshot path (overrides the config file)
    #[arg(short, long, value_name = "PATH")]
    pub directory: Option<PathBuf>,
}

impl Cli {
    fn selection(&self) -> TargetSelection {
        if self.all {
            TargetSelection::All
        } else if let Some(hosts) = &self.host {
            TargetSelection::Hostnames(
                hosts
                    .split(',')
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .collect(),
            )
        } else if let Some(id) = self.id {
            TargetSelection::Id(id)
        } else {
            // clap's scope group guarantees one of the above.
            unreachable!("argument group enforces a scope selection")
        }
    }
}

/// Load everything, run the pool, and print the outcome summary.
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::load()?,
    };

    let directory_path = cli
        .directory
        .clone()
        .unwrap_or_else(|| config.directory_path.clone());
    let directory = Arc::new(
        InMemoryDirectory::load(&directory_path).with_context(|| {
            format!(
                "Failed to load directory snapshot from {}",
                directory_path.display()
            )
        })?,
    );

    let selection = cli.selection();
    let servers = SyncPlanner::plan(directory.as_ref(), &selection)?;
    if servers.is_empty() {
        tracing::warn!("no servers under key management match the selection");
        return Ok(());
    }

    let sync_key = SyncKey::load(&config.sync_key_path)
        .with_context(|| "Sync cannot start: sync key pair not found")?;

    let memory = Arc::new(MemoryReports::new());
    let reports = Arc::new(TeeReports(LogReports, Arc::clone(&memory)));
    let ctx = SyncContext {
        directory,
        reports,
        transport: Arc::new(OpenSshTransport::new(sync_key.private_key_path())),
        resolver: Arc::new(DnsResolver),
        config: Arc::new(config),
        sync_public_key: sync_key.public_key_line().to_string(),
    };

    let options = SessionOptions {
        only_account: cli.user.clone(),
        preview: cli.preview,
    };
    let pool = WorkerPool::new(ctx.config.max_workers);
    let results = pool.run(&ctx, servers, &options).await;

    if !cli.preview {
        let (mut failed, mut warned) = (0usize, 0usize);
        for entry in memory.entries() {
            if let ReportEntry::Server { outcome, .. } = entry {
                match outcome {
                    SyncOutcome::Failure => failed += 1,
                    SyncOutcome::Warning => warned += 1,
                    SyncOutcome::Success => {}
                }
            }
        }
        tracing::info!(
            servers = results.len(),
            failed,
            warned,
            "sync run complete"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_requires_exactly_one_scope() {
        let err = Cli::try_parse_from(["keywarden"]).expect_err("no scope should fail");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from(["keywarden", "--all", "--id", "3"])
            .expect_err("two scopes should fail");
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_all_selection() {
        let cli = Cli::try_parse_from(["keywarden", "--all"]).expect("should parse");
        assert!(matches!(cli.selection(), TargetSelection::All));
    }

    #[test]
    fn test_host_selection_splits_and_trims() {
        let cli = Cli::try_parse_from(["keywarden", "--host", "web1, web2 ,web3"])
            .expect("should parse");
        match cli.selection() {
            TargetSelection::Hostnames(hosts) => {
                assert_eq!(hosts, vec!["web1", "web2", "web3"]);
            }
            other => panic!("expected hostnames, got {other:?}"),
        }
    }

    #[test]
    fn test_id_selection() {
        let cli = Cli::try_parse_from(["keywarden", "--id", "42"]).expect("should parse");
        assert!(matches!(cli.selection(), TargetSelection::Id(42)));
    }

    #[test]
    fn test_short_host_flag_is_uppercase() {
        // -h is taken by --help; the short host flag is -H.
        let cli = Cli::try_parse_from(["keywarden", "-H", "web1"]).expect("should parse");
        assert!(matches!(cli.selection(), TargetSelection::Hostnames(_)));
    }

    #[test]
    fn test_user_and_preview_flags() {
        let cli = Cli::try_parse_from(["keywarden", "--all", "--user", "deploy", "--preview"])
            .expect("should parse");
        assert_eq!(cli.user.as_deref(), Some("deploy"));
        assert!(cli.preview);
    }
}
