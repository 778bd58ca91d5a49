// ABOUTME: Hostname resolution capability consumed by sync sessions
// ABOUTME: DNS-backed implementation plus a fixed-table one for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;

/// Resolves a hostname to the address the session will connect to.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> io::Result<String>;
}

/// System DNS resolution via tokio's lookup.
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, hostname: &str) -> io::Result<String> {
        let mut addrs = tokio::net::lookup_host((hostname, 0)).await?;
        addrs
            .next()
            .map(|addr| addr.ip().to_string())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {hostname}"))
            })
    }
}

/// Fixed hostname → address table. Used by tests and air-gapped runs.
#[derive(Default)]
pub struct StaticResolver {
    table: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hostname: impl Into<String>, ip: impl Into<String>) -> Self {
        self.table.insert(hostname.into(), ip.into());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, hostname: &str) -> io::Result<String> {
        self.table.get(hostname).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for {hostname}"))
        })
    }
}
