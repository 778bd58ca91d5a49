// ABOUTME: Target selection and the bounded worker pool
// ABOUTME: Semaphore-capped sessions, results flushed in completion order

use crate::session::{ServerSyncSession, SessionOptions, SessionResult, SyncContext};
use keywarden_model::{Directory, KeyManagement, Server};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Which servers a run targets. Exactly one form per invocation.
#[derive(Debug, Clone)]
pub enum TargetSelection {
    /// Every managed server in the directory.
    All,
    /// Named hostnames, as given on the command line.
    Hostnames(Vec<String>),
    /// One server by id.
    Id(u32),
}

/// Turns a selection into the list of servers to sync.
pub struct SyncPlanner;

impl SyncPlanner {
    /// Resolve the selection and filter to servers under `keys`
    /// management; everything else never participates in sync.
    ///
    /// # Errors
    /// Returns `DirectoryError` when a named hostname or id is unknown.
    pub fn plan(
        dir: &dyn Directory,
        selection: &TargetSelection,
    ) -> keywarden_model::Result<Vec<Server>> {
        let servers = match selection {
            TargetSelection::All => dir.list_servers(),
            TargetSelection::Hostnames(hostnames) => hostnames
                .iter()
                .map(|hostname| dir.server_by_hostname(hostname.trim()))
                .collect::<keywarden_model::Result<Vec<_>>>()?,
            TargetSelection::Id(id) => vec![dir.server_by_id(*id)?],
        };
        Ok(servers
            .into_iter()
            .filter(|s| s.key_management == KeyManagement::Keys)
            .collect())
    }
}

/// Runs one session per server under a fixed concurrency ceiling.
///
/// Submission order is first-come-first-started; completion order drives
/// both output flushing and pool refill. A slow server holds exactly one
/// slot and cannot starve the rest of the fleet.
pub struct WorkerPool {
    ceiling: usize,
}

impl WorkerPool {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
        }
    }

    /// Sync every server, printing each session's buffered log as it
    /// completes. Returns results in completion order.
    pub async fn run(
        &self,
        ctx: &SyncContext,
        servers: Vec<Server>,
        options: &SessionOptions,
    ) -> Vec<SessionResult> {
        self.run_with(ctx, servers, options, |result| {
            for line in &result.log {
                println!("{line}");
            }
        })
        .await
    }

    /// Like [`run`](Self::run) with a custom per-completion callback.
    pub async fn run_with(
        &self,
        ctx: &SyncContext,
        servers: Vec<Server>,
        options: &SessionOptions,
        mut on_complete: impl FnMut(&SessionResult),
    ) -> Vec<SessionResult> {
        let semaphore = Arc::new(Semaphore::new(self.ceiling));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let expected = servers.len();
        for server in servers {
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let ctx = ctx.clone();
            let options = options.clone();
            tokio::spawn(async move {
                // Closing the semaphore is not part of this pool's
                // lifecycle, so acquire can only fail if the runtime is
                // shutting down; dropping the task is correct then.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = ServerSyncSession::new(ctx, server, options).run().await;
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected);
        while let Some(result) = rx.recv().await {
            on_complete(&result);
            results.push(result);
        }
        results
    }
}
