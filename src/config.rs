use std::env;
use std::path::PathBuf;

use egress_guard::GuardConfig;
use network_tap_light::RankerConfig;
use serde::{Deserialize, Serialize};
use soulbrowser_templates::LifecyclePolicy;

use crate::replay::ReplayConfig;

pub const STORE_DIR_ENV: &str = "LIVECALL_STORE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one JSON file per template.
    pub store_dir: PathBuf,
    pub guard: GuardConfig,
    pub replay: ReplayConfig,
    pub ranker: RankerConfig,
    pub lifecycle: LifecyclePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./soulbrowser-output/live-templates"),
            guard: GuardConfig::default(),
            replay: ReplayConfig::default(),
            ranker: RankerConfig::default(),
            lifecycle: LifecyclePolicy::default(),
        }
    }
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var(STORE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.store_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.store_dir.as_os_str().is_empty() {
            return Err("store_dir must not be empty".into());
        }
        if self.guard.resolve_timeout_ms == 0 {
            return Err("guard.resolve_timeout_ms must be positive".into());
        }
        if self.replay.timeout_ms == 0 {
            return Err("replay.timeout_ms must be positive".into());
        }
        if self.replay.max_response_bytes == 0 {
            return Err("replay.max_response_bytes must be positive".into());
        }
        if self.ranker.top_k == 0 {
            return Err("ranker.top_k must be at least 1".into());
        }
        self.lifecycle
            .validate()
            .map_err(|err| format!("lifecycle: {err}"))
    }
}
