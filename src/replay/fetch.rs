use std::collections::BTreeMap;
use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

/// A fully built request, already cleared by the egress guard.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Addresses the guard vetted; a fetcher that opens its own connection
    /// must connect only to these.
    pub pinned_addrs: Vec<IpAddr>,
    pub max_response_bytes: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Issues requests through the live browser session, reusing its cookies
/// and transport. The replay path has no other way out to the network.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Navigates the live session to a recovery page (login refresh, consent
/// wall) so a retried call can authenticate.
#[async_trait]
pub trait AuthRecovery: Send + Sync {
    async fn recover(&self, recovery_url: &str, pinned_addrs: &[IpAddr]) -> Result<(), FetchError>;
}
