use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::shape::Fingerprint;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl Default for ParamType {
    fn default() -> Self {
        ParamType::String
    }
}

/// Where a placeholder lives in the request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSource {
    Path,
    Query,
    Body,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    pub source: ParamSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// JSON.
    Structured,
    Text,
    Markup,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    Json,
    Form,
    Raw,
}

impl BodyEncoding {
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            BodyEncoding::Json => Some("application/json"),
            BodyEncoding::Form => Some("application/x-www-form-urlencoded"),
            BodyEncoding::Raw => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BodyTemplate {
    pub encoding: BodyEncoding,
    pub content: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRecoveryPolicy {
    pub trigger_statuses: Vec<u16>,
    /// Page navigated to before retrying; `None` disables recovery.
    pub recovery_url: Option<String>,
    pub max_retries: u32,
}

impl Default for AuthRecoveryPolicy {
    fn default() -> Self {
        Self {
            trigger_statuses: vec![401, 403],
            recovery_url: None,
            max_retries: 1,
        }
    }
}

impl AuthRecoveryPolicy {
    pub fn triggers(&self, status: u16) -> bool {
        self.trigger_statuses.contains(&status)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Verified,
    Deprecated,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Draft => "draft",
            LifecycleStatus::Verified => "verified",
            LifecycleStatus::Deprecated => "deprecated",
        }
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub consecutive_drifts: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_similarity: Option<f64>,
}

/// A persisted, replayable description of one network call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub task: String,
    /// Absolute URL with `{{name}}` placeholders in path segments and query values.
    pub url_template: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyTemplate>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<String>,
    /// Empty means any host passes the domain check.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub auth_recovery: AuthRecoveryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Fingerprint>,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub usage: UsageStats,
    /// Bumped by every committed save.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Host of the URL template. Placeholders never occur in the authority.
    pub fn host(&self) -> Option<String> {
        crate::codec::placeholders::template_host(&self.url_template)
    }
}

/// Host of an absolute URL, lowercased.
pub fn url_host(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
}
