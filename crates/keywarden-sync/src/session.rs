// ABOUTME: Per-server sync session state machine
// ABOUTME: Resolve, connect, verify, diff, apply, clean up, finalize, report

use crate::config::SyncConfig;
use crate::keyfile::{KeyFile, KeyFileBuilder};
use crate::resolve::Resolver;
use chrono::{SecondsFormat, Utc};
use keywarden_model::{
    Directory, KeyManagement, ReportSink, Server, ServerUpdate, SyncOutcome, SYNC_ACCOUNT,
};
use keywarden_ssh::{shell_quote, Connection, FileChannel, SshError, Transport};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared handles every session runs against.
///
/// Constructed once at startup and cloned into each worker; everything
/// behind the Arcs is read-only during a sync pass apart from the
/// server-field persistence and report appends the traits expose.
#[derive(Clone)]
pub struct SyncContext {
    pub directory: Arc<dyn Directory>,
    pub reports: Arc<dyn ReportSink>,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn Resolver>,
    pub config: Arc<SyncConfig>,
    /// Public half of the sync key, appended to legacy root keyfiles.
    pub sync_public_key: String,
}

/// Per-invocation switches.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Restrict reconciliation to a single account name.
    pub only_account: Option<String>,
    /// Generate and print keyfiles without connecting or mutating.
    pub preview: bool,
}

/// What one session produced: the server-level outcome (absent in
/// preview mode) and the buffered, timestamped log lines.
#[derive(Debug)]
pub struct SessionResult {
    pub hostname: String,
    pub outcome: Option<(SyncOutcome, String)>,
    pub log: Vec<String>,
}

enum ConnectFailure {
    Connect,
    HostKey,
    Auth,
}

impl ConnectFailure {
    fn reason(&self) -> &'static str {
        match self {
            ConnectFailure::Connect => "SSH connection failed",
            ConnectFailure::HostKey => "SSH host key verification failed",
            ConnectFailure::Auth => "SSH authentication failed",
        }
    }
}

/// One server's reconciliation, start to finish.
///
/// Any step may fail the whole session; per-account errors inside the
/// diff step are contained and tallied instead. Output is buffered so
/// the worker pool can flush whole sessions in completion order.
pub struct ServerSyncSession {
    ctx: SyncContext,
    server: Server,
    options: SessionOptions,
    log: Vec<String>,
    warning: Option<&'static str>,
    account_errors: usize,
    cleanup_errors: usize,
    keyfiles: BTreeMap<String, KeyFile>,
}

impl ServerSyncSession {
    pub fn new(ctx: SyncContext, server: Server, options: SessionOptions) -> Self {
        Self {
            ctx,
            server,
            options,
            log: Vec::new(),
            warning: None,
            account_errors: 0,
            cleanup_errors: 0,
            keyfiles: BTreeMap::new(),
        }
    }

    fn note(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(hostname = %self.server.hostname, message);
        self.log.push(format!(
            "{} {}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            self.server.hostname,
            message
        ));
    }

    pub async fn run(mut self) -> SessionResult {
        self.note("Preparing sync.");

        match self.ctx.resolver.resolve(&self.server.hostname).await {
            Ok(ip) => {
                self.server.ip_address = Some(ip.clone());
                let _ = self
                    .ctx
                    .directory
                    .update_server(self.server.id, ServerUpdate::ip_address(ip));
            }
            Err(e) => self.note(format!("Could not resolve hostname: {e}.")),
        }

        if self.server.key_management != KeyManagement::Keys {
            return self.finish(None);
        }

        let builder = KeyFileBuilder::new(
            self.ctx.directory.as_ref(),
            self.ctx.config.base_url.as_deref(),
        );
        self.keyfiles = builder.build_for_server(&self.server, self.options.only_account.as_deref());

        if self.options.preview {
            let lines: Vec<String> = self
                .keyfiles
                .iter()
                .map(|(name, keyfile)| format!("account '{}':\n\n{}", name, keyfile.content))
                .collect();
            for line in lines {
                self.note(line);
            }
            return self.finish(None);
        }

        if let Some(ip) = self.server.ip_address.clone() {
            self.note(format!("Checking IP address {ip}."));
            if self.ctx.directory.servers_at_address(&ip).len() > 1 {
                self.note("Multiple hosts with same IP address.");
                return self.fail("Multiple hosts with same IP address");
            }
        }

        self.note("Attempting to connect.");
        // The deadline covers connect, host key check, and auth only.
        // Once authenticated, the session runs to completion: aborting a
        // sync mid-write would leave the server half-reconciled.
        let deadline = Duration::from_secs(self.ctx.config.connect_timeout_secs);
        let (conn, legacy) = match tokio::time::timeout(deadline, self.connect_phase()).await {
            Err(_) => {
                self.note("SSH connection timed out.");
                return self.fail("SSH connection timed out");
            }
            Ok(Err(failure)) => return self.fail(failure.reason()),
            Ok(Ok(established)) => established,
        };

        let files = match conn.open_files().await {
            Ok(files) => files,
            Err(_) => {
                self.note("SFTP subsystem setup failed.");
                return self.fail("SFTP subsystem failed");
            }
        };

        let key_dir = self.ctx.config.key_dir.clone();
        let key_dir_exists = matches!(files.stat(&key_dir).await, Ok(Some(_)));
        if !key_dir_exists {
            self.note("Key directory does not exist.");
            self.warning = Some("Key directory does not exist");
        }
        if legacy && self.warning.is_none() {
            self.warning = Some("Using legacy sync method");
        }

        if legacy {
            self.legacy_apply(files.as_ref()).await;
        }

        if key_dir_exists {
            let mut checksums = self.remote_checksums(conn.as_ref()).await;
            let keyfiles = self.keyfiles.clone();
            for (filename, keyfile) in &keyfiles {
                if let Some(only) = self.options.only_account.as_deref() {
                    if filename != only {
                        continue;
                    }
                }
                match self
                    .sync_account_file(conn.as_ref(), files.as_ref(), filename, keyfile, &mut checksums)
                    .await
                {
                    Ok(()) => {
                        if let Some(account) = &keyfile.account {
                            let outcome = if self.warning.is_some() && filename != "root" {
                                // Synced, but inert until the server-side
                                // configuration is fixed.
                                SyncOutcome::Warning
                            } else {
                                SyncOutcome::Success
                            };
                            self.ctx
                                .reports
                                .report_account(&self.server.hostname, account, outcome);
                        }
                    }
                    Err(e) => {
                        self.account_errors += 1;
                        self.note(format!("Sync command execution failed for {filename}, {e}"));
                        if let Some(account) = &keyfile.account {
                            self.ctx.reports.report_account(
                                &self.server.hostname,
                                account,
                                SyncOutcome::Failure,
                            );
                        }
                    }
                }
            }

            if self.options.only_account.is_none() {
                self.cleanup_orphans(files.as_ref(), checksums).await;
            }
        }

        self.refresh_uuid(files.as_ref()).await;
        self.finalize()
    }

    /// Connect, verify the pinned host key, and authenticate, trying the
    /// sync identity first and root as the legacy fallback.
    async fn connect_phase(
        &mut self,
    ) -> Result<(Box<dyn Connection>, bool), ConnectFailure> {
        let mut conn = match self
            .ctx
            .transport
            .connect(&self.server.hostname, self.server.port())
            .await
        {
            Ok(conn) => conn,
            Err(_) => {
                self.note("Failed to connect.");
                return Err(ConnectFailure::Connect);
            }
        };

        let fingerprint = match conn.host_fingerprint().await {
            Ok(fp) => fp,
            Err(_) => {
                self.note("Failed to connect.");
                return Err(ConnectFailure::Connect);
            }
        };
        match &self.server.host_key_fingerprint {
            // First contact: pin whatever the host presented.
            None => {
                let _ = self.ctx.directory.update_server(
                    self.server.id,
                    ServerUpdate::fingerprint(fingerprint.clone()),
                );
                self.server.host_key_fingerprint = Some(fingerprint);
            }
            Some(pinned) => {
                if pinned != &fingerprint {
                    self.note("Host key validation failed.");
                    return Err(ConnectFailure::HostKey);
                }
            }
        }

        let mut legacy = false;
        for username in [SYNC_ACCOUNT, "root"] {
            match conn.authenticate(username).await {
                Ok(()) => {
                    self.note(format!("Logged in as {username}."));
                    return Ok((conn, legacy));
                }
                Err(_) => legacy = true,
            }
        }
        self.note("Public key authentication failed.");
        Err(ConnectFailure::Auth)
    }

    /// Write the combined root keyfile plus the sync public key to the
    /// legacy authorized-keys path. Reported immediately, independent of
    /// the diff step.
    async fn legacy_apply(&mut self, files: &dyn FileChannel) {
        let Some(keyfile) = self.keyfiles.get("root").cloned() else {
            return;
        };
        let combined = format!("{}{}\n", keyfile.content, self.ctx.sync_public_key);
        let path = self.ctx.config.legacy_key_path.clone();
        match files.write(&path, combined.as_bytes(), 0o600).await {
            Ok(()) => {
                if let Some(account) = &keyfile.account {
                    self.ctx.reports.report_account(
                        &self.server.hostname,
                        account,
                        SyncOutcome::Success,
                    );
                }
            }
            Err(_) => {
                self.note("Sync command execution failed for legacy root.");
                self.account_errors += 1;
                if let Some(account) = &keyfile.account {
                    self.ctx.reports.report_account(
                        &self.server.hostname,
                        account,
                        SyncOutcome::Failure,
                    );
                }
            }
        }
    }

    /// Checksum every file in the key directory with one remote command.
    async fn remote_checksums(&mut self, conn: &dyn Connection) -> BTreeMap<String, String> {
        let command = format!(
            "/usr/bin/sha256sum {}/*",
            shell_quote(&self.ctx.config.key_dir)
        );
        match conn.exec(&command).await {
            Ok(output) => parse_checksums(&output.stdout, &self.ctx.config.key_dir),
            Err(e) => {
                self.note(format!("Could not list remote checksums: {e}"));
                BTreeMap::new()
            }
        }
    }

    /// Reconcile one account file: existence-probe when flagged, write
    /// only on checksum mismatch, fix ownership after writing.
    async fn sync_account_file(
        &mut self,
        conn: &dyn Connection,
        files: &dyn FileChannel,
        filename: &str,
        keyfile: &KeyFile,
        checksums: &mut BTreeMap<String, String>,
    ) -> Result<(), SshError> {
        let remote_path = format!("{}/{}", self.ctx.config.key_dir, filename);

        let mut create = true;
        if keyfile.check_account_exists {
            let probe = conn.exec(&format!("id {}", shell_quote(filename))).await?;
            if probe.stdout.trim().is_empty() {
                create = false;
            }
        }

        if create {
            let local = hex::encode(Sha256::digest(keyfile.content.as_bytes()));
            if checksums.get(filename) == Some(&local) {
                self.note(format!("No changes required for {filename}"));
            } else {
                files
                    .write(&remote_path, keyfile.content.as_bytes(), 0o644)
                    .await?;
                conn.exec(&format!("chown keys-sync: {}", shell_quote(&remote_path)))
                    .await?;
                self.note(format!("Updated {filename}"));
            }
        } else if checksums.contains_key(filename) {
            files.remove(&remote_path).await?;
        }

        // Reconciled either way; whatever remains in the map afterwards
        // is an orphan.
        checksums.remove(filename);
        Ok(())
    }

    /// Delete leftover files with no corresponding desired keyfile.
    async fn cleanup_orphans(
        &mut self,
        files: &dyn FileChannel,
        checksums: BTreeMap<String, String>,
    ) {
        for filename in checksums.into_keys() {
            if filename.is_empty() || filename == SYNC_ACCOUNT {
                continue;
            }
            let path = format!("{}/{}", self.ctx.config.key_dir, filename);
            match files.remove(&path).await {
                Ok(()) => self.note(format!("Removed unknown file: {filename}")),
                Err(_) => {
                    self.cleanup_errors += 1;
                    self.note(format!("Couldn't remove unknown file: {filename}"));
                }
            }
        }
    }

    /// Best-effort refresh of the server's recorded identity marker.
    /// Absence of the marker is not an error.
    async fn refresh_uuid(&mut self, files: &dyn FileChannel) {
        if let Ok(bytes) = files.read(&self.ctx.config.uuid_path).await {
            let uuid = String::from_utf8_lossy(&bytes).trim().to_string();
            if !uuid.is_empty() {
                let _ = self
                    .ctx
                    .directory
                    .update_server(self.server.id, ServerUpdate::uuid(uuid));
            }
        }
    }

    fn finalize(mut self) -> SessionResult {
        let outcome = if self.cleanup_errors > 0 {
            (
                SyncOutcome::Failure,
                format!(
                    "Failed to clean up {} file{}",
                    self.cleanup_errors,
                    plural(self.cleanup_errors)
                ),
            )
        } else if self.account_errors > 0 {
            (
                SyncOutcome::Failure,
                format!(
                    "{} account{} failed to sync",
                    self.account_errors,
                    plural(self.account_errors)
                ),
            )
        } else if let Some(warning) = self.warning {
            (SyncOutcome::Warning, warning.to_string())
        } else {
            (SyncOutcome::Success, "Synced successfully".to_string())
        };
        self.ctx
            .reports
            .report_server(&self.server.hostname, outcome.0, &outcome.1);
        self.note("Sync finished");
        self.finish(Some(outcome))
    }

    /// Server-level failure: report it, clear queued sync requests so the
    /// failure is not immediately retried, and mark every pending account
    /// outcome failed.
    fn fail(mut self, reason: &str) -> SessionResult {
        self.ctx
            .reports
            .report_server(&self.server.hostname, SyncOutcome::Failure, reason);
        self.ctx.directory.clear_sync_requests(self.server.id);
        for keyfile in self.keyfiles.values() {
            if let Some(account) = &keyfile.account {
                self.ctx.reports.report_account(
                    &self.server.hostname,
                    account,
                    SyncOutcome::Failure,
                );
            }
        }
        let outcome = Some((SyncOutcome::Failure, reason.to_string()));
        self.finish(outcome)
    }

    fn finish(self, outcome: Option<(SyncOutcome, String)>) -> SessionResult {
        SessionResult {
            hostname: self.server.hostname,
            outcome,
            log: self.log,
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn parse_checksums(stdout: &str, key_dir: &str) -> BTreeMap<String, String> {
    let prefix = format!("{key_dir}/");
    let mut map = BTreeMap::new();
    for line in stdout.lines() {
        let Some((digest, path)) = line.split_once("  ") else {
            continue;
        };
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        if let Some(name) = path.strip_prefix(&prefix) {
            // Only direct children; the key directory holds no subtrees.
            if !name.is_empty() && !name.contains('/') {
                map.insert(name.to_string(), digest.to_ascii_lowercase());
            }
        }
    }
    map
}
