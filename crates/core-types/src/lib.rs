//! Shared primitives for the SoulBrowser live-call engine.
//!
//! These types cross crate boundaries: the network tap produces
//! [`RecordedCall`]s, the ranker turns them into [`Candidate`]s and the
//! template synthesizer consumes both.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PageId(pub String);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What caused the browser to issue a request.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Initiator {
    /// `fetch()` or `XMLHttpRequest` issued by page script.
    Fetch,
    Script,
    Other,
    /// Loads driven by markup: documents, stylesheets, images, fonts.
    Markup,
}

impl Initiator {
    /// Maps a CDP `Network.ResourceType` string onto an initiator category.
    pub fn from_resource_type(resource_type: &str) -> Self {
        match resource_type.to_ascii_lowercase().as_str() {
            "fetch" | "xhr" | "eventsource" => Initiator::Fetch,
            "script" => Initiator::Script,
            "document" | "stylesheet" | "image" | "media" | "font" | "manifest" => {
                Initiator::Markup
            }
            _ => Initiator::Other,
        }
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Initiator::Other
    }
}

/// One observed network transaction.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub url: String,
    pub method: String,
    pub status: u16,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub content_type: Option<String>,
    /// Response body, possibly truncated by the collector.
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub response_body: Option<String>,
    /// Size of the full response in bytes when the collector knows it.
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub response_size: Option<u64>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub body_truncated: bool,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub initiator: Initiator,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub request_headers: BTreeMap<String, String>,
    #[cfg_attr(feature = "serde-full", serde(default))]
    pub request_body: Option<String>,
}

impl RecordedCall {
    pub fn new(url: impl Into<String>, method: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            status,
            content_type: None,
            response_body: None,
            response_size: None,
            body_truncated: false,
            initiator: Initiator::Other,
            request_headers: BTreeMap::new(),
            request_body: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }

    /// Best known response size: the collector's figure, else the body length.
    pub fn size_hint(&self) -> u64 {
        self.response_size.unwrap_or_else(|| {
            self.response_body
                .as_ref()
                .map(|body| body.len() as u64)
                .unwrap_or(0)
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Appended to bodies cut at a byte cap so truncation is never silent.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Cuts `body` to at most `max_bytes` (on a char boundary) and appends
/// [`TRUNCATION_MARKER`]. Returns the body and whether it was cut.
pub fn truncate_with_marker(mut body: String, max_bytes: usize) -> (String, bool) {
    if body.len() <= max_bytes {
        return (body, false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body.push_str(TRUNCATION_MARKER);
    (body, true)
}

/// Page the trace was captured on.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PageContext {
    pub url: Option<String>,
    pub title: Option<String>,
}

impl PageContext {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: None,
        }
    }
}

/// A recorded call plus its ranking score and the reasons behind it.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub call: RecordedCall,
    /// Position of the call in the original trace.
    pub trace_index: usize,
    pub score: f64,
    pub reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_types_map_to_initiators() {
        assert_eq!(Initiator::from_resource_type("XHR"), Initiator::Fetch);
        assert_eq!(Initiator::from_resource_type("Fetch"), Initiator::Fetch);
        assert_eq!(Initiator::from_resource_type("Document"), Initiator::Markup);
        assert_eq!(Initiator::from_resource_type("Script"), Initiator::Script);
        assert_eq!(Initiator::from_resource_type("Ping"), Initiator::Other);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (body, cut) = truncate_with_marker("héllo".to_string(), 2);
        assert!(cut);
        assert_eq!(body, format!("h{TRUNCATION_MARKER}"));
        let (body, cut) = truncate_with_marker("short".to_string(), 64);
        assert!(!cut);
        assert_eq!(body, "short");
    }

    #[test]
    fn size_hint_prefers_collector_size() {
        let mut call = RecordedCall::new("https://a.test/x", "GET", 200).with_body("abc");
        assert_eq!(call.size_hint(), 3);
        call.response_size = Some(4096);
        assert_eq!(call.size_hint(), 4096);
    }
}
