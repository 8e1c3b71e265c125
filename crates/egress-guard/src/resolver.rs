//! Hostname resolution seam.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use parking_lot::RwLock;

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns every address the name resolves to.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, String>;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Clone, Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, String> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|err| err.to_string())?;
        let mut out: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            let ip = addr.ip();
            if !out.contains(&ip) {
                out.push(ip);
            }
        }
        Ok(out)
    }
}

/// Fixed name table. Names missing from the table fail to resolve.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.set(host, addrs);
        self
    }

    /// Replaces the answer for `host`; later lookups see the new addresses.
    pub fn set(&self, host: &str, addrs: Vec<IpAddr>) {
        self.table.write().insert(host.to_ascii_lowercase(), addrs);
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> Result<Vec<IpAddr>, String> {
        self.table
            .read()
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| format!("no such host: {host}"))
    }
}
