//! Boundary between the ranked candidates and an external chooser.
//!
//! The engine never picks or parameterizes a call itself. It shapes a
//! [`ChooserRequest`] from the top candidates, hands it to a
//! [`CandidateChooser`] and validates the returned [`ChooserDecision`] into a
//! draft [`Template`]. Rejected decisions never reach the store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use soulbrowser_core_types::Candidate;
use thiserror::Error;
use url::Url;

use crate::codec::headers::sanitize_headers;
use crate::codec::placeholders::{check_url_template, placeholder_sources, template_host};
use crate::codec::shape::Fingerprint;
use crate::model::{
    url_host, AuthRecoveryPolicy, BodyEncoding, BodyTemplate, LifecycleStatus, ParamType,
    Parameter, ResponseType, Template, UsageStats,
};

const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "token", "key", "secret", "sig", "signature", "session", "auth", "password", "passwd",
    "code", "access", "credential",
];

/// Whole query keys that carry credentials but do not split into a listed word.
const CREDENTIAL_QUERY_KEYS: &[&str] = &[
    "apikey", "accesstoken", "authtoken", "sessionid", "jwt", "sid",
];

/// What the chooser sees of one candidate. Raw request headers never appear.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub index: usize,
    pub url: String,
    pub method: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub size: u64,
    pub score: f64,
    pub reasons: Vec<String>,
    pub snippet: Option<String>,
    pub truncated: bool,
}

impl CandidateSummary {
    pub fn from_candidate(index: usize, candidate: &Candidate, snippet_chars: usize) -> Self {
        let call = &candidate.call;
        let snippet = call
            .response_body
            .as_deref()
            .filter(|body| !body.is_empty())
            .map(|body| body.chars().take(snippet_chars).collect::<String>());
        Self {
            index,
            url: mask_url(&call.url),
            method: call.method.to_ascii_uppercase(),
            status: call.status,
            content_type: call.content_type.clone(),
            size: call.size_hint(),
            score: candidate.score,
            reasons: candidate.reasons.clone(),
            truncated: call.body_truncated
                || call
                    .response_body
                    .as_deref()
                    .map(|b| b.chars().count() > snippet_chars)
                    .unwrap_or(false),
            snippet,
        }
    }
}

/// Replaces values of credential-looking query keys with `***`.
pub fn mask_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let lower = k.to_ascii_lowercase();
            let masked = SENSITIVE_QUERY_KEYS.iter().any(|s| lower.contains(s));
            let value = if masked { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChooserRequest {
    pub task: String,
    pub page_url: Option<String>,
    pub candidates: Vec<CandidateSummary>,
}

impl ChooserRequest {
    pub fn new(
        task: impl Into<String>,
        page_url: Option<String>,
        candidates: &[Candidate],
        snippet_chars: usize,
    ) -> Self {
        Self {
            task: task.into(),
            page_url,
            candidates: candidates
                .iter()
                .enumerate()
                .map(|(idx, c)| CandidateSummary::from_candidate(idx, c, snippet_chars))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default, rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// The chooser's structured answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChooserDecision {
    /// Index into the candidate list handed to the chooser.
    pub selected: usize,
    pub name: String,
    /// Defaults to the selected candidate's URL.
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub body: Option<BodyTemplate>,
    pub response_type: ResponseType,
    #[serde(default)]
    pub extraction: Option<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Explicit opt-out of the domain allowlist.
    #[serde(default)]
    pub allow_any_domain: bool,
    #[serde(default)]
    pub auth_recovery: Option<AuthRecoveryPolicy>,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SynthError {
    #[error("candidate {index} does not exist ({available} offered)")]
    UnknownCandidate { index: usize, available: usize },
    #[error("template name is empty")]
    EmptyName,
    #[error("url template is empty")]
    EmptyUrl,
    #[error("invalid url template: {0}")]
    InvalidUrl(String),
    #[error("url template host {template} differs from candidate host {candidate}")]
    HostMismatch { template: String, candidate: String },
    #[error("parameter '{0}' does not appear as a placeholder")]
    UnknownParameter(String),
    #[error("placeholder '{0}' has no parameter binding")]
    UnboundPlaceholder(String),
    #[error("invalid allowlist entry '{0}'")]
    InvalidAllowlist(String),
    #[error("query key '{0}' carries a literal credential; bind it to a placeholder")]
    CredentialInUrl(String),
    #[error("invalid recovery url: {0}")]
    InvalidRecoveryUrl(String),
    #[error("chooser failed: {0}")]
    Chooser(String),
}

impl SynthError {
    pub fn category(&self) -> &'static str {
        match self {
            SynthError::Chooser(_) => "chooser_failed",
            _ => "invalid_decision",
        }
    }
}

/// An external selector: a model, a human, or a fixed decision in tests.
#[async_trait]
pub trait CandidateChooser: Send + Sync {
    /// `Ok(None)` means no candidate fits the task.
    async fn choose(&self, request: &ChooserRequest) -> Result<Option<ChooserDecision>, SynthError>;
}

/// Validates `decision` against `candidates` and builds a draft template.
pub fn synthesize(
    decision: &ChooserDecision,
    candidates: &[Candidate],
    task: &str,
) -> Result<Template, SynthError> {
    let candidate = candidates
        .get(decision.selected)
        .ok_or(SynthError::UnknownCandidate {
            index: decision.selected,
            available: candidates.len(),
        })?;
    let call = &candidate.call;

    let name = decision.name.trim();
    if name.is_empty() {
        return Err(SynthError::EmptyName);
    }

    let url_template = decision
        .url_template
        .as_deref()
        .unwrap_or(call.url.as_str())
        .trim()
        .to_string();
    if url_template.is_empty() {
        return Err(SynthError::EmptyUrl);
    }
    check_url_template(&url_template).map_err(|err| SynthError::InvalidUrl(err.to_string()))?;
    if let Some(key) = literal_credential_key(&url_template) {
        return Err(SynthError::CredentialInUrl(key));
    }

    let template_host = template_host(&url_template)
        .ok_or_else(|| SynthError::InvalidUrl("url template has no host".into()))?;
    let candidate_host = url_host(&call.url).unwrap_or_default();
    if template_host != candidate_host {
        return Err(SynthError::HostMismatch {
            template: template_host,
            candidate: candidate_host,
        });
    }

    let body = decision.body.clone().or_else(|| {
        call.request_body
            .as_ref()
            .filter(|b| !b.is_empty())
            .map(|content| BodyTemplate {
                encoding: BodyEncoding::Raw,
                content: content.clone(),
            })
    });

    let sources = placeholder_sources(&url_template, body.as_ref())
        .map_err(|err| SynthError::InvalidUrl(err.to_string()))?;
    if let Some(unknown) = decision
        .parameters
        .keys()
        .find(|name| !sources.contains_key(*name))
    {
        return Err(SynthError::UnknownParameter(unknown.clone()));
    }
    if let Some(unbound) = sources
        .keys()
        .find(|name| !decision.parameters.contains_key(*name))
    {
        return Err(SynthError::UnboundPlaceholder(unbound.clone()));
    }
    let parameters = sources
        .iter()
        .filter_map(|(name, source)| {
            decision.parameters.get(name).map(|spec| Parameter {
                name: name.clone(),
                param_type: spec.param_type,
                required: spec.required,
                source: *source,
                default: spec.default.clone(),
                description: spec.description.clone(),
            })
        })
        .collect();

    let allowed_domains = if decision.allow_any_domain {
        Vec::new()
    } else if decision.allowed_domains.is_empty() {
        vec![candidate_host]
    } else {
        let mut domains = Vec::new();
        for entry in &decision.allowed_domains {
            let entry = entry.trim().trim_start_matches("*.").to_ascii_lowercase();
            if entry.is_empty() || entry.contains(['/', ':', '@', ' ']) {
                return Err(SynthError::InvalidAllowlist(entry));
            }
            domains.push(entry);
        }
        domains
    };

    let auth_recovery = decision.auth_recovery.clone().unwrap_or_default();
    if let Some(recovery_url) = auth_recovery.recovery_url.as_deref() {
        check_recovery_url(recovery_url, &allowed_domains)?;
    }

    let (headers, _) = sanitize_headers(&call.request_headers);
    let baseline = match decision.response_type {
        ResponseType::Structured if !call.body_truncated => call
            .response_body
            .as_deref()
            .and_then(Fingerprint::from_body),
        _ => None,
    };
    let extraction = decision
        .extraction
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    let method = decision
        .method
        .as_deref()
        .unwrap_or(call.method.as_str())
        .trim()
        .to_ascii_uppercase();

    let now = Utc::now();
    Ok(Template {
        name: name.to_string(),
        task: task.to_string(),
        url_template,
        method: if method.is_empty() { "GET".into() } else { method },
        headers,
        body,
        parameters,
        response_type: decision.response_type,
        extraction,
        allowed_domains,
        auth_recovery,
        baseline,
        status: LifecycleStatus::Draft,
        usage: UsageStats::default(),
        revision: 0,
        created_at: now,
        updated_at: now,
    })
}

fn is_credential_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    CREDENTIAL_QUERY_KEYS.contains(&lower.as_str())
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|part| SENSITIVE_QUERY_KEYS.contains(&part))
}

/// First credential-looking query key whose value is written out literally
/// instead of coming from a placeholder.
fn literal_credential_key(url_template: &str) -> Option<String> {
    let (_, query) = url_template.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| {
            let value = value.trim();
            let templated = value.starts_with("{{") && value.ends_with("}}");
            !value.is_empty() && !templated && is_credential_key(key)
        })
        .map(|(key, _)| key.to_string())
}

/// The recovery page is navigated to with the live session, so it gets the
/// same scheme, credential and allowlist rules as the call itself.
fn check_recovery_url(raw: &str, allowed_domains: &[String]) -> Result<(), SynthError> {
    let reject = |msg: &str| Err(SynthError::InvalidRecoveryUrl(format!("{raw}: {msg}")));
    let Ok(url) = Url::parse(raw.trim()) else {
        return reject("unparsable");
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return reject("scheme must be http(s)");
    }
    if !url.username().is_empty() || url.password().is_some() {
        return reject("embeds credentials");
    }
    let Some(host) = url_host(raw.trim()).filter(|h| !h.is_empty()) else {
        return reject("no host");
    };
    let allowed = allowed_domains.is_empty()
        || allowed_domains
            .iter()
            .any(|entry| host == *entry || host.ends_with(&format!(".{entry}")));
    if !allowed {
        return reject("host is outside the allowed domains");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulbrowser_core_types::{Initiator, RecordedCall};

    fn candidate() -> Candidate {
        Candidate {
            call: RecordedCall::new(
                "https://api.example.com/v1/search?q=shoes&api_key=s3cr3t",
                "get",
                200,
            )
            .with_content_type("application/json")
            .with_initiator(Initiator::Fetch)
            .with_header("Authorization", "Bearer xyz")
            .with_header("Accept", "application/json")
            .with_body(r#"{"items":[{"id":1}]}"#),
            trace_index: 4,
            score: 6.5,
            reasons: vec!["content-type application/json".into()],
        }
    }

    fn decision() -> ChooserDecision {
        let mut parameters = BTreeMap::new();
        parameters.insert("q".to_string(), ParameterSpec::default());
        ChooserDecision {
            selected: 0,
            name: "Shoe search".into(),
            url_template: Some("https://api.example.com/v1/search?q={{q}}".into()),
            method: None,
            parameters,
            body: None,
            response_type: ResponseType::Structured,
            extraction: Some("  ".into()),
            allowed_domains: Vec::new(),
            allow_any_domain: false,
            auth_recovery: None,
        }
    }

    #[test]
    fn summaries_mask_secrets_and_omit_headers() {
        let summary = CandidateSummary::from_candidate(0, &candidate(), 8);
        assert!(summary.url.contains("api_key=***"));
        assert!(summary.url.contains("q=shoes"));
        assert!(!summary.url.contains("s3cr3t"));
        assert_eq!(summary.snippet.as_deref(), Some(r#"{"items""#));
        assert!(summary.truncated);
        assert_eq!(summary.method, "GET");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("Bearer"));
    }

    #[test]
    fn valid_decision_becomes_draft_template() {
        let template = synthesize(&decision(), &[candidate()], "find shoes").unwrap();
        assert_eq!(template.status, LifecycleStatus::Draft);
        assert_eq!(template.method, "GET");
        assert_eq!(template.allowed_domains, vec!["api.example.com"]);
        assert!(template.headers.contains_key("accept"));
        assert!(!template.headers.contains_key("authorization"));
        assert_eq!(template.parameters.len(), 1);
        assert_eq!(template.parameters[0].source, crate::model::ParamSource::Query);
        assert!(template.baseline.is_some());
        assert_eq!(template.extraction, None);
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let mut d = decision();
        d.selected = 3;
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::UnknownCandidate {
                index: 3,
                available: 1
            }
        );
    }

    #[test]
    fn parameters_must_match_placeholders() {
        let mut d = decision();
        d.parameters.insert("page".into(), ParameterSpec::default());
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::UnknownParameter("page".into())
        );

        let mut d = decision();
        d.parameters.clear();
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::UnboundPlaceholder("q".into())
        );
    }

    #[test]
    fn empty_url_and_foreign_host_are_rejected() {
        let mut d = decision();
        d.url_template = Some("   ".into());
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::EmptyUrl
        );

        let mut d = decision();
        d.url_template = Some("https://evil.com/search?q={{q}}".into());
        assert!(matches!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::HostMismatch { .. }
        ));

        let mut d = decision();
        d.url_template = Some("https://{{q}}/search".into());
        assert!(matches!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::InvalidUrl(_)
        ));
    }

    #[test]
    fn recovery_url_must_stay_inside_the_allowlist() {
        let mut d = decision();
        d.allowed_domains = vec!["example.com".into()];
        d.auth_recovery = Some(AuthRecoveryPolicy {
            recovery_url: Some("https://www.example.com/login".into()),
            ..AuthRecoveryPolicy::default()
        });
        assert!(synthesize(&d, &[candidate()], "t").is_ok());

        for bad in [
            "https://evil.com/login",
            "http://[2606:4700::1%25eth0]/login",
            "http://8.8.8.8:99999/",
            "javascript:alert(1)",
            "https://user:pw@www.example.com/login",
        ] {
            let mut d = d.clone();
            d.auth_recovery = Some(AuthRecoveryPolicy {
                recovery_url: Some(bad.into()),
                ..AuthRecoveryPolicy::default()
            });
            assert!(
                matches!(
                    synthesize(&d, &[candidate()], "t").unwrap_err(),
                    SynthError::InvalidRecoveryUrl(_)
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn literal_credentials_in_the_url_are_rejected() {
        let mut d = decision();
        d.url_template = None;
        d.parameters.clear();
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::CredentialInUrl("api_key".into())
        );

        let mut d = decision();
        d.url_template = Some("https://api.example.com/v1/search?q={{q}}&apiKey=abc".into());
        assert_eq!(
            synthesize(&d, &[candidate()], "t").unwrap_err(),
            SynthError::CredentialInUrl("apiKey".into())
        );

        let mut d = decision();
        d.url_template = Some("https://api.example.com/v1/search?q={{q}}&token={{token}}".into());
        d.parameters.insert("token".into(), ParameterSpec::default());
        assert!(synthesize(&d, &[candidate()], "t").is_ok());

        let mut d = decision();
        d.url_template = Some("https://api.example.com/v1/search?q={{q}}&zipcode=12345".into());
        assert!(synthesize(&d, &[candidate()], "t").is_ok());
    }

    #[test]
    fn allowlist_opt_out_must_be_explicit() {
        let mut d = decision();
        d.allow_any_domain = true;
        let template = synthesize(&d, &[candidate()], "t").unwrap();
        assert!(template.allowed_domains.is_empty());

        let mut d = decision();
        d.allowed_domains = vec!["*.Example.com".into()];
        let template = synthesize(&d, &[candidate()], "t").unwrap();
        assert_eq!(template.allowed_domains, vec!["example.com"]);
    }
}
