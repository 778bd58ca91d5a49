// ABOUTME: Sync outcome types and the ReportSink trait
// ABOUTME: Append-only reporting, safe for concurrent workers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Final state of a sync attempt for one account or one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Warning,
    Failure,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "sync success"),
            SyncOutcome::Warning => write!(f, "sync warning"),
            SyncOutcome::Failure => write!(f, "sync failure"),
        }
    }
}

/// Append-only sink for sync outcomes.
///
/// Workers for distinct servers report concurrently; implementations
/// must tolerate interleaved appends. There is no read-modify-write in
/// this interface by design.
pub trait ReportSink: Send + Sync {
    /// Record the outcome for one account on one server.
    fn report_account(&self, hostname: &str, account: &str, outcome: SyncOutcome);

    /// Record the single server-level outcome with its summary message.
    fn report_server(&self, hostname: &str, outcome: SyncOutcome, message: &str);
}

impl<T: ReportSink + ?Sized> ReportSink for std::sync::Arc<T> {
    fn report_account(&self, hostname: &str, account: &str, outcome: SyncOutcome) {
        (**self).report_account(hostname, account, outcome);
    }

    fn report_server(&self, hostname: &str, outcome: SyncOutcome, message: &str) {
        (**self).report_server(hostname, outcome, message);
    }
}

/// Sink that emits outcomes as tracing events. The default for the CLI.
pub struct LogReports;

impl ReportSink for LogReports {
    fn report_account(&self, hostname: &str, account: &str, outcome: SyncOutcome) {
        tracing::info!(hostname, account, %outcome, "account sync outcome");
    }

    fn report_server(&self, hostname: &str, outcome: SyncOutcome, message: &str) {
        match outcome {
            SyncOutcome::Failure => {
                tracing::error!(hostname, message, "server sync failed");
            }
            SyncOutcome::Warning => {
                tracing::warn!(hostname, message, "server sync warning");
            }
            SyncOutcome::Success => {
                tracing::info!(hostname, message, "server sync succeeded");
            }
        }
    }
}

/// One recorded report entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEntry {
    Account {
        hostname: String,
        account: String,
        outcome: SyncOutcome,
    },
    Server {
        hostname: String,
        outcome: SyncOutcome,
        message: String,
    },
}

/// Sink that collects reports in memory, in append order.
///
/// Used by tests and by the CLI to compute the process exit summary.
#[derive(Default)]
pub struct MemoryReports {
    entries: Mutex<Vec<ReportEntry>>,
}

impl MemoryReports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Server-level outcome recorded for a hostname, if any.
    pub fn server_outcome(&self, hostname: &str) -> Option<(SyncOutcome, String)> {
        self.entries()
            .into_iter()
            .rev()
            .find_map(|entry| match entry {
                ReportEntry::Server {
                    hostname: h,
                    outcome,
                    message,
                } if h == hostname => Some((outcome, message)),
                _ => None,
            })
    }

    /// Outcomes recorded for accounts on a hostname, in append order.
    pub fn account_outcomes(&self, hostname: &str) -> Vec<(String, SyncOutcome)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ReportEntry::Account {
                    hostname: h,
                    account,
                    outcome,
                } if h == hostname => Some((account, outcome)),
                _ => None,
            })
            .collect()
    }
}

impl ReportSink for MemoryReports {
    fn report_account(&self, hostname: &str, account: &str, outcome: SyncOutcome) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ReportEntry::Account {
                hostname: hostname.to_string(),
                account: account.to_string(),
                outcome,
            });
    }

    fn report_server(&self, hostname: &str, outcome: SyncOutcome, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ReportEntry::Server {
                hostname: hostname.to_string(),
                outcome,
                message: message.to_string(),
            });
    }
}

/// Fan out every report to two sinks.
pub struct TeeReports<A, B>(pub A, pub B);

impl<A: ReportSink, B: ReportSink> ReportSink for TeeReports<A, B> {
    fn report_account(&self, hostname: &str, account: &str, outcome: SyncOutcome) {
        self.0.report_account(hostname, account, outcome);
        self.1.report_account(hostname, account, outcome);
    }

    fn report_server(&self, hostname: &str, outcome: SyncOutcome, message: &str) {
        self.0.report_server(hostname, outcome, message);
        self.1.report_server(hostname, outcome, message);
    }
}
