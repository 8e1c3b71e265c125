//! Trace and decision files for the offline `rank` and `learn` commands.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use soulbrowser_core_types::{PageContext, RecordedCall};
use soulbrowser_templates::{CandidateChooser, ChooserDecision, ChooserRequest, SynthError};
use tokio::fs;

/// A trace file: a bare array of calls or an object with page context.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TraceFile {
    Calls(Vec<RecordedCall>),
    Capture {
        #[serde(default)]
        page: Option<PageContext>,
        calls: Vec<RecordedCall>,
    },
}

pub struct LoadedTrace {
    pub page: PageContext,
    pub calls: Vec<RecordedCall>,
}

/// Reads JSON, or YAML when the extension says so.
pub async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Loads a trace. `page_url` overrides the page recorded in the file.
pub async fn load_trace(path: &Path, page_url: Option<String>) -> Result<LoadedTrace> {
    let (page, calls) = match read_document::<TraceFile>(path).await? {
        TraceFile::Calls(calls) => (None, calls),
        TraceFile::Capture { page, calls } => (page, calls),
    };
    if calls.is_empty() {
        bail!("trace {} contains no calls", path.display());
    }
    let mut page = page.unwrap_or_default();
    if let Some(url) = page_url {
        page.url = Some(url);
    }
    Ok(LoadedTrace { page, calls })
}

/// Chooser backed by a decision prepared ahead of time, typically after
/// reviewing `livecall rank` output.
pub struct FileChooser {
    decision: ChooserDecision,
}

impl FileChooser {
    pub async fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            decision: read_document(path).await?,
        })
    }
}

#[async_trait]
impl CandidateChooser for FileChooser {
    async fn choose(&self, request: &ChooserRequest) -> Result<Option<ChooserDecision>, SynthError> {
        if request.candidates.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.decision.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn both_trace_shapes_load() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        fs::write(
            &bare,
            r#"[{"url": "https://api.example.com/q", "method": "GET", "status": 200}]"#,
        )
        .await
        .unwrap();
        let trace = load_trace(&bare, Some("https://example.com/".into()))
            .await
            .unwrap();
        assert_eq!(trace.calls.len(), 1);
        assert_eq!(trace.page.url.as_deref(), Some("https://example.com/"));

        let wrapped = dir.path().join("wrapped.yaml");
        fs::write(
            &wrapped,
            "page:\n  url: https://shop.example.com/\ncalls:\n  - url: https://shop.example.com/api\n    method: GET\n    status: 200\n",
        )
        .await
        .unwrap();
        let trace = load_trace(&wrapped, None).await.unwrap();
        assert_eq!(trace.page.url.as_deref(), Some("https://shop.example.com/"));
    }

    #[tokio::test]
    async fn empty_trace_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, "[]").await.unwrap();
        assert!(load_trace(&path, None).await.is_err());
    }
}
