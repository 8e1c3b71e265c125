//! Template replay.
//!
//! Builds the request from a template and parameter values, clears it with
//! the egress guard, sends it through the live session and classifies the
//! response. The guard runs again before every transmission: each retry
//! after auth recovery and the recovery navigation itself included.

pub mod extract;
pub mod fetch;

use std::sync::Arc;
use std::time::Duration;

use egress_guard::EgressGuard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soulbrowser_core_types::truncate_with_marker;
use soulbrowser_templates::codec::placeholders::{build_body, build_url, resolve_values, ParamValues};
use soulbrowser_templates::{drift_similarity, fingerprint, Fingerprint, ResponseType, Template};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{LiveCallError, LiveCallResult};
pub use fetch::{AuthRecovery, FetchError, FetchRequest, FetchResponse, PageFetcher};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Per-transmission timeout.
    pub timeout_ms: u64,
    pub max_response_bytes: usize,
    /// Upper bound on auth-recovery retries, whatever a template asks for.
    pub max_auth_retries: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_response_bytes: 2 * 1024 * 1024,
            max_auth_retries: 2,
        }
    }
}

/// Caller-side controls for one replay.
#[derive(Clone, Debug, Default)]
pub struct ReplayControl {
    /// Deadline for the whole replay, recovery included.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl ReplayControl {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    pub category: String,
    pub message: String,
}

impl ReplayFailure {
    fn new(category: &str, message: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            message: message.into(),
        }
    }
}

/// Outcome of a replay that got a response back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub success: bool,
    pub status: u16,
    pub content_type: Option<String>,
    /// Extracted value when extraction worked, else the parsed body (JSON) or
    /// the raw text.
    pub data: Option<Value>,
    pub raw: String,
    pub truncated: bool,
    pub failure: Option<ReplayFailure>,
    pub auth_recovery_triggered: bool,
    pub auth_retries: u32,
    pub extraction_error: Option<String>,
    pub similarity: Option<f64>,
    #[serde(skip)]
    pub fingerprint: Option<Fingerprint>,
}

pub struct ReplayExecutor {
    guard: Arc<EgressGuard>,
    fetcher: Arc<dyn PageFetcher>,
    recovery: Option<Arc<dyn AuthRecovery>>,
    config: ReplayConfig,
}

impl ReplayExecutor {
    pub fn new(guard: Arc<EgressGuard>, fetcher: Arc<dyn PageFetcher>, config: ReplayConfig) -> Self {
        Self {
            guard,
            fetcher,
            recovery: None,
            config,
        }
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn AuthRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replays `template`. Cancellation or the control timeout drops the
    /// in-flight fetch and returns an error; nothing is persisted here.
    pub async fn execute(
        &self,
        template: &Template,
        params: &ParamValues,
        control: &ReplayControl,
    ) -> LiveCallResult<ReplayResult> {
        let run = self.run(template, params, &control.cancel);
        let bounded = async {
            match control.timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => Err(LiveCallError::TransientTransport(format!(
                        "replay exceeded {} ms",
                        limit.as_millis()
                    ))),
                },
                None => run.await,
            }
        };
        tokio::select! {
            biased;
            _ = control.cancel.cancelled() => Err(LiveCallError::Cancelled),
            result = bounded => result,
        }
    }

    async fn run(
        &self,
        template: &Template,
        params: &ParamValues,
        cancel: &CancellationToken,
    ) -> LiveCallResult<ReplayResult> {
        let rendered = resolve_values(&template.parameters, params)?;
        let url = build_url(&template.url_template, &rendered)?;
        let body = template
            .body
            .as_ref()
            .map(|body| build_body(body, &rendered))
            .transpose()?;
        let mut headers = template.headers.clone();
        if let Some(content_type) = template.body.as_ref().and_then(|b| b.encoding.content_type()) {
            headers
                .entry("content-type".to_string())
                .or_insert_with(|| content_type.to_string());
        }

        let policy = &template.auth_recovery;
        let max_retries = policy.max_retries.min(self.config.max_auth_retries);
        let mut retries = 0u32;
        let mut triggered = false;

        loop {
            if cancel.is_cancelled() {
                return Err(LiveCallError::Cancelled);
            }
            let clearance = self.guard.clear(&url, &template.allowed_domains).await?;
            debug!(template = %template.name, host = %clearance.host, attempt = retries, "sending replay request");
            let (response, truncated) = self
                .send(FetchRequest {
                    url: url.clone(),
                    method: template.method.clone(),
                    headers: headers.clone(),
                    body: body.clone(),
                    pinned_addrs: clearance.addrs,
                    max_response_bytes: self.config.max_response_bytes,
                })
                .await?;

            if !policy.triggers(response.status) {
                let mut result = self.classify(template, response, truncated);
                result.auth_recovery_triggered = triggered;
                result.auth_retries = retries;
                return Ok(result);
            }

            triggered = true;
            let recovery_url = match (&policy.recovery_url, &self.recovery) {
                (Some(target), Some(_)) if retries < max_retries => target.clone(),
                _ => {
                    warn!(template = %template.name, status = response.status, retries, "auth recovery exhausted");
                    let mut result = self.classify(template, response, truncated);
                    result.success = false;
                    result.data = None;
                    result.failure = Some(ReplayFailure::new(
                        "auth_required",
                        LiveCallError::AuthRequired {
                            status: result.status,
                        }
                        .to_string(),
                    ));
                    result.auth_recovery_triggered = true;
                    result.auth_retries = retries;
                    return Ok(result);
                }
            };

            retries += 1;
            info!(template = %template.name, status = response.status, retry = retries, "running auth recovery");
            let recovery_clearance = self
                .guard
                .clear(&recovery_url, &template.allowed_domains)
                .await?;
            if let Some(recovery) = &self.recovery {
                self.bounded(recovery.recover(&recovery_url, &recovery_clearance.addrs))
                    .await?;
            }
        }
    }

    /// Sends one request. Bodies over the byte cap come back cut, with the
    /// marker appended and the flag set.
    async fn send(&self, request: FetchRequest) -> LiveCallResult<(FetchResponse, bool)> {
        let mut response = self.bounded(self.fetcher.fetch(request)).await?;
        let (body, truncated) =
            truncate_with_marker(std::mem::take(&mut response.body), self.config.max_response_bytes);
        response.body = body;
        Ok((response, truncated))
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, FetchError>>,
    ) -> LiveCallResult<T> {
        let limit = Duration::from_millis(self.config.timeout_ms.max(1));
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(LiveCallError::TransientTransport(err.to_string())),
            Err(_) => Err(LiveCallError::TransientTransport(FetchError::Timeout.to_string())),
        }
    }

    fn classify(&self, template: &Template, response: FetchResponse, truncated: bool) -> ReplayResult {
        let FetchResponse {
            status,
            content_type,
            body,
        } = response;
        let mut result = ReplayResult {
            success: false,
            status,
            content_type: content_type.clone(),
            data: None,
            raw: body,
            truncated,
            failure: None,
            auth_recovery_triggered: false,
            auth_retries: 0,
            extraction_error: None,
            similarity: None,
            fingerprint: None,
        };

        if !(200..300).contains(&status) {
            result.failure = Some(ReplayFailure::new("http_status", format!("status {status}")));
            return result;
        }

        let parsed: Option<Value> = match template.response_type {
            ResponseType::Structured => {
                if truncated {
                    result.failure = Some(ReplayFailure::new(
                        "response_too_large",
                        format!("body exceeds {} bytes", self.config.max_response_bytes),
                    ));
                    return result;
                }
                match serde_json::from_str::<Value>(&result.raw) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        result.failure =
                            Some(ReplayFailure::new("unparsable_body", "body is not valid JSON"));
                        return result;
                    }
                }
            }
            ResponseType::Markup => {
                let ct = content_type.unwrap_or_default().to_ascii_lowercase();
                let looks_like_markup = ct.contains("html")
                    || ct.contains("xml")
                    || result.raw.trim_start().starts_with('<');
                if !looks_like_markup {
                    result.failure =
                        Some(ReplayFailure::new("unparsable_body", "body is not markup"));
                    return result;
                }
                None
            }
            ResponseType::Text => None,
        };

        result.success = true;
        if let (Some(value), Some(baseline)) = (&parsed, &template.baseline) {
            let fresh = fingerprint(value);
            let similarity = drift_similarity(baseline, &fresh);
            result.similarity = Some(similarity);
            result.fingerprint = Some(fresh);
        }

        // Extraction never decides success.
        let fallback = parsed
            .clone()
            .unwrap_or_else(|| Value::String(result.raw.clone()));
        result.data = match template.extraction.as_deref() {
            Some(expr) => match extract::extract(expr, &result.raw, parsed.as_ref()) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(template = %template.name, error = %err, "extraction failed; returning raw data");
                    result.extraction_error =
                        Some(LiveCallError::ExtractionFailed(err.to_string()).user_message());
                    Some(fallback)
                }
            },
            None => Some(fallback),
        };
        result
    }
}
