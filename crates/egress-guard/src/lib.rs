//! SoulBrowser egress guard.
//!
//! Decides whether a URL may be contacted. Checks run in a fixed order:
//! scheme, embedded credentials, denylisted names, IP literals in every
//! spelling, then resolution of the name to *all* of its addresses. A single
//! blocked address in the answer blocks the whole URL, and a name that fails
//! to resolve is blocked rather than waved through.
//!
//! The guard is cheap to call and is meant to run immediately before every
//! transmission, not once per template.

pub mod config;
pub mod ip;
pub mod resolver;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::{Host, Url};

pub use crate::config::GuardConfig;
pub use crate::ip::{classify, parse_ip_literal, AddrCategory};
pub use crate::resolver::{HostResolver, StaticResolver, SystemResolver};

const DENIED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "0",
    "0.0.0.0",
    "::",
    "::1",
    "metadata.google.internal",
];

/// Reason a URL was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    #[error("scheme '{scheme}' is not http(s)")]
    UnsupportedScheme { scheme: String },
    #[error("url could not be parsed")]
    Malformed,
    #[error("url embeds credentials")]
    EmbeddedCredentials,
    #[error("url has no host")]
    MissingHost,
    #[error("host '{host}' is denylisted")]
    DeniedHostname { host: String },
    #[error("address {addr} is {category}")]
    BlockedAddress { addr: IpAddr, category: AddrCategory },
    #[error("host '{host}' resolves to {category} address {addr}")]
    ResolvesToBlockedAddress {
        host: String,
        addr: IpAddr,
        category: AddrCategory,
    },
    #[error("host '{host}' could not be resolved")]
    ResolutionFailed { host: String },
    #[error("host '{host}' is outside the allowed domains")]
    DomainNotAllowed { host: String },
}

impl BlockReason {
    /// Stable category name for user-facing reporting.
    pub fn category(&self) -> &'static str {
        match self {
            BlockReason::ResolutionFailed { .. } => "resolution_failed",
            _ => "validation_blocked",
        }
    }
}

/// Errors emitted by the guard surface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("egress blocked: {0}")]
    Blocked(BlockReason),
    #[error("egress blocked: {0}")]
    ResolutionFailed(BlockReason),
}

impl GuardError {
    pub fn reason(&self) -> &BlockReason {
        match self {
            GuardError::Blocked(reason) | GuardError::ResolutionFailed(reason) => reason,
        }
    }
}

impl From<BlockReason> for GuardError {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::ResolutionFailed { .. } => GuardError::ResolutionFailed(reason),
            other => GuardError::Blocked(other),
        }
    }
}

/// Outcome of a single check, kept for auditing.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationResult {
    pub host: Option<String>,
    pub blocked: Option<BlockReason>,
    /// Addresses the host resolved to (or the literal itself).
    pub resolved: Vec<IpAddr>,
}

impl ValidationResult {
    fn allowed(host: String, resolved: Vec<IpAddr>) -> Self {
        Self {
            host: Some(host),
            blocked: None,
            resolved,
        }
    }

    fn blocked(host: Option<String>, reason: BlockReason) -> Self {
        Self {
            host,
            blocked: Some(reason),
            resolved: Vec::new(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.blocked.is_none()
    }

    pub fn into_result(self) -> Result<Clearance, GuardError> {
        match self.blocked {
            Some(reason) => Err(reason.into()),
            None => Ok(Clearance {
                host: self.host.unwrap_or_default(),
                addrs: self.resolved,
            }),
        }
    }
}

/// Proof that a URL passed the guard, with the addresses that were vetted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clearance {
    pub host: String,
    pub addrs: Vec<IpAddr>,
}

pub struct EgressGuard {
    resolver: Arc<dyn HostResolver>,
    config: GuardConfig,
}

impl EgressGuard {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self::with_config(resolver, GuardConfig::default())
    }

    pub fn with_config(resolver: Arc<dyn HostResolver>, config: GuardConfig) -> Self {
        Self { resolver, config }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemResolver))
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Checks that `raw` is safe to contact.
    pub async fn validate_url(&self, raw: &str) -> ValidationResult {
        let raw = raw.trim();
        let Some((scheme, rest)) = raw.split_once(':') else {
            return ValidationResult::blocked(None, BlockReason::Malformed);
        };
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return ValidationResult::blocked(None, BlockReason::UnsupportedScheme { scheme });
        }

        // Inspect the raw authority first: the WHATWG parser rejects zoned
        // IPv6 literals outright and we want a precise reason for them.
        let authority = raw_authority(rest);
        if authority.contains('@') {
            return ValidationResult::blocked(None, BlockReason::EmbeddedCredentials);
        }
        let literal_host = normalize_host(host_of_authority(authority));
        if literal_host.is_empty() {
            return ValidationResult::blocked(None, BlockReason::MissingHost);
        }
        if let Some(reason) = self.denied_name(&literal_host) {
            return ValidationResult::blocked(Some(literal_host), reason);
        }
        if !port_is_valid(authority) {
            return ValidationResult::blocked(Some(literal_host), BlockReason::Malformed);
        }
        if let Some(ip) = parse_ip_literal(&literal_host) {
            return check_literal(literal_host, ip);
        }

        let parsed = match Url::parse(raw) {
            Ok(parsed) => parsed,
            Err(_) => return ValidationResult::blocked(Some(literal_host), BlockReason::Malformed),
        };
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return ValidationResult::blocked(Some(literal_host), BlockReason::EmbeddedCredentials);
        }
        let port = parsed.port_or_known_default().unwrap_or(443);
        match parsed.host() {
            Some(Host::Ipv4(v4)) => check_literal(v4.to_string(), IpAddr::V4(v4)),
            Some(Host::Ipv6(v6)) => check_literal(v6.to_string(), IpAddr::V6(v6)),
            Some(Host::Domain(domain)) => {
                let domain = normalize_host(domain);
                if let Some(reason) = self.denied_name(&domain) {
                    return ValidationResult::blocked(Some(domain), reason);
                }
                self.check_resolved(domain, port).await
            }
            None => ValidationResult::blocked(None, BlockReason::MissingHost),
        }
    }

    /// Like [`validate_url`](Self::validate_url) but also enforces `allowlist`.
    ///
    /// An empty allowlist is permissive; otherwise the host must equal an
    /// entry or be a proper subdomain of one.
    pub async fn validate_domain(&self, raw: &str, allowlist: &[String]) -> ValidationResult {
        if !allowlist.is_empty() {
            // Both the raw authority and the parser's view of the host must
            // pass, so a URL the parser rejects cannot skip the list.
            let Some(literal_host) = authority_host(raw) else {
                return ValidationResult::blocked(None, BlockReason::Malformed);
            };
            let parsed_host = Url::parse(raw.trim())
                .ok()
                .and_then(|url| url.host_str().map(normalize_host));
            for host in std::iter::once(literal_host).chain(parsed_host) {
                if !host_allowed(&host, allowlist) {
                    warn!(host = %host, "egress outside allowed domains");
                    return ValidationResult::blocked(
                        Some(host.clone()),
                        BlockReason::DomainNotAllowed { host },
                    );
                }
            }
        }
        self.validate_url(raw).await
    }

    /// Runs [`validate_domain`](Self::validate_domain) and converts to a `Result`.
    pub async fn clear(&self, raw: &str, allowlist: &[String]) -> Result<Clearance, GuardError> {
        let result = self.validate_domain(raw, allowlist).await;
        if let Some(reason) = &result.blocked {
            warn!(host = ?result.host, reason = %reason, "egress blocked");
        }
        result.into_result()
    }

    fn denied_name(&self, host: &str) -> Option<BlockReason> {
        let bare = ip::strip_brackets_and_zone(host);
        let denied = DENIED_HOSTNAMES.iter().any(|name| bare == *name)
            || bare.ends_with(".localhost")
            || self
                .config
                .denied_hosts
                .iter()
                .any(|name| bare.eq_ignore_ascii_case(name.trim()));
        denied.then(|| BlockReason::DeniedHostname {
            host: host.to_string(),
        })
    }

    async fn check_resolved(&self, host: String, port: u16) -> ValidationResult {
        let timeout = Duration::from_millis(self.config.resolve_timeout_ms.max(1));
        let lookup = tokio::time::timeout(timeout, self.resolver.resolve(&host, port)).await;
        let addrs = match lookup {
            Ok(Ok(addrs)) if !addrs.is_empty() => addrs,
            Ok(Ok(_)) => {
                warn!(host = %host, "resolution returned no addresses");
                return ValidationResult::blocked(
                    Some(host.clone()),
                    BlockReason::ResolutionFailed { host },
                );
            }
            Ok(Err(err)) => {
                warn!(host = %host, %err, "resolution failed");
                return ValidationResult::blocked(
                    Some(host.clone()),
                    BlockReason::ResolutionFailed { host },
                );
            }
            Err(_) => {
                warn!(host = %host, timeout_ms = self.config.resolve_timeout_ms, "resolution timed out");
                return ValidationResult::blocked(
                    Some(host.clone()),
                    BlockReason::ResolutionFailed { host },
                );
            }
        };

        for addr in &addrs {
            if let Some(category) = classify(addr) {
                return ValidationResult::blocked(
                    Some(host.clone()),
                    BlockReason::ResolvesToBlockedAddress {
                        host,
                        addr: *addr,
                        category,
                    },
                );
            }
        }
        debug!(host = %host, count = addrs.len(), "host cleared");
        ValidationResult::allowed(host, addrs)
    }
}

fn check_literal(host: String, ip: IpAddr) -> ValidationResult {
    match classify(&ip) {
        Some(category) => ValidationResult::blocked(
            Some(host),
            BlockReason::BlockedAddress { addr: ip, category },
        ),
        None => ValidationResult::allowed(host, vec![ip]),
    }
}

/// Authority component of everything after `scheme:`.
///
/// Backslashes count as slashes, matching how browsers treat special schemes.
fn raw_authority(after_scheme: &str) -> &str {
    let trimmed = after_scheme.trim_start_matches(['/', '\\']);
    let end = trimmed
        .find(['/', '\\', '?', '#'])
        .unwrap_or(trimmed.len());
    &trimmed[..end]
}

fn host_of_authority(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rfind(':') {
        Some(idx) => &authority[..idx],
        None => authority,
    }
}

/// Host named by the raw authority of `raw`. IDNA-mapped when it parses as
/// a host on its own, kept verbatim otherwise.
fn authority_host(raw: &str) -> Option<String> {
    let (_, rest) = raw.trim().split_once(':')?;
    let host = normalize_host(host_of_authority(raw_authority(rest)));
    if host.is_empty() {
        return None;
    }
    match Host::parse(&host) {
        Ok(parsed) => Some(normalize_host(&parsed.to_string())),
        Err(_) => Some(host),
    }
}

/// An explicit port must fit in 16 bits; an empty one means the default.
fn port_is_valid(authority: &str) -> bool {
    let host = host_of_authority(authority);
    match authority[host.len()..].strip_prefix(':') {
        None => authority.len() == host.len(),
        Some(port) => port.is_empty() || port.parse::<u16>().is_ok(),
    }
}

fn normalize_host(host: &str) -> String {
    let mut host = host.trim().to_ascii_lowercase();
    while host.ends_with('.') && host.len() > 1 {
        host.pop();
    }
    host
}

fn normalize_allow_entry(entry: &str) -> String {
    let entry = entry.trim().to_ascii_lowercase();
    let entry = entry.strip_prefix("*.").unwrap_or(&entry);
    entry.trim_matches('.').to_string()
}

/// Exact host or proper-subdomain match against `allowlist`.
pub fn host_allowed(host: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let host = normalize_host(host);
    allowlist.iter().any(|entry| {
        let entry = normalize_allow_entry(entry);
        !entry.is_empty() && (host == entry || host.ends_with(&format!(".{entry}")))
    })
}
