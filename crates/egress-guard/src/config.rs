//! Configuration types for the egress guard.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub resolve_timeout_ms: u64,
    /// Extra hostnames rejected in addition to the built-in loopback names.
    pub denied_hosts: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: 2_000,
            denied_hosts: Vec::new(),
        }
    }
}
