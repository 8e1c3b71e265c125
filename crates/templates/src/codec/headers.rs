use std::collections::BTreeMap;

const CREDENTIAL_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-csrf-token",
    "x-xsrf-token",
    "x-amz-security-token",
];

const CREDENTIAL_FRAGMENTS: &[&str] = &[
    "token",
    "secret",
    "session",
    "password",
    "auth",
    "credential",
    "csrf",
    "xsrf",
];

/// Set by the transport, never by a template.
const TRANSPORT_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-length",
    "accept-encoding",
];

pub fn is_credential_header(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    CREDENTIAL_HEADERS.contains(&name.as_str())
        || CREDENTIAL_FRAGMENTS.iter().any(|frag| name.contains(frag))
}

pub fn is_transport_header(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    name.starts_with(':') || name.starts_with("sec-") || TRANSPORT_HEADERS.contains(&name.as_str())
}

/// Returns the headers safe to persist (names lowercased) and the names dropped.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> (BTreeMap<String, String>, Vec<String>) {
    let mut kept = BTreeMap::new();
    let mut dropped = Vec::new();
    for (name, value) in headers {
        let lower = name.trim().to_ascii_lowercase();
        if lower.is_empty() || is_credential_header(&lower) || is_transport_header(&lower) {
            dropped.push(lower);
        } else {
            kept.insert(lower, value.clone());
        }
    }
    (kept, dropped)
}
