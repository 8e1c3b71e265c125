//! Configuration types for the network tap (light) and the call ranker.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Response bodies above this size are cut and flagged as truncated.
    pub max_body_bytes: usize,
    /// Requests still in flight after this long are evicted by maintenance.
    pub inflight_timeout_ms: u64,
    pub maintenance_interval_ms: u64,
    /// Completed calls kept per page before the oldest are dropped.
    pub max_calls_per_page: usize,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 256 * 1024,
            inflight_timeout_ms: 30_000,
            maintenance_interval_ms: 1_000,
            max_calls_per_page: 2_000,
        }
    }
}

/// Per-signal weights applied by the ranker. Signals are summed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RankWeights {
    pub content_type: f64,
    pub status: f64,
    pub size: f64,
    pub initiator: f64,
    pub query_bonus: f64,
    pub path_hint: f64,
    pub tracker_penalty: f64,
    pub same_site_bonus: f64,
    pub task_overlap: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            content_type: 2.2,
            status: 1.2,
            size: 1.1,
            initiator: 0.8,
            query_bonus: 0.3,
            path_hint: 0.6,
            tracker_penalty: -2.5,
            same_site_bonus: 0.25,
            task_overlap: 1.6,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    pub top_k: usize,
    /// Leading body characters searched for task tokens and shown to a chooser.
    pub snippet_chars: usize,
    /// Body size at which the size signal saturates.
    pub size_saturation_bytes: u64,
    pub weights: RankWeights,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            snippet_chars: 4_096,
            size_saturation_bytes: 64 * 1024,
            weights: RankWeights::default(),
        }
    }
}
