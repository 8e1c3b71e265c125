use serde::{Deserialize, Serialize};

/// Thresholds driving template lifecycle transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
    /// Consecutive stable-shape successes before `draft` becomes `verified`.
    pub verify_after_successes: u32,
    /// Consecutive failures (or drifts) before a template is deprecated.
    pub deprecate_after_failures: u32,
    /// Shape similarity below this counts as drift.
    pub drift_threshold: f64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            verify_after_successes: 3,
            deprecate_after_failures: 3,
            drift_threshold: 0.5,
        }
    }
}

impl LifecyclePolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.verify_after_successes == 0 {
            return Err("verify_after_successes must be at least 1".into());
        }
        if self.deprecate_after_failures == 0 {
            return Err("deprecate_after_failures must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.drift_threshold) {
            return Err("drift_threshold must be within [0, 1]".into());
        }
        Ok(())
    }
}
