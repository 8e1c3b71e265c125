#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use soulbrowser_livecall::{
    AuthRecovery, Config, FetchError, FetchRequest, FetchResponse, LiveCallEngine, PageFetcher,
    StaticResolver,
};
use soulbrowser_templates::{
    fingerprint, AuthRecoveryPolicy, FileTemplateStore, LifecycleStatus, ParamSource, ParamType,
    Parameter, ResponseType, Template, TemplateStore, UsageStats,
};

pub const API_IP: &str = "93.184.216.34";

pub fn ip(raw: &str) -> IpAddr {
    raw.parse().unwrap()
}

pub fn public_resolver() -> Arc<StaticResolver> {
    Arc::new(
        StaticResolver::new()
            .with_host("api.example.com", vec![ip(API_IP)])
            .with_host("www.example.com", vec![ip(API_IP)])
            .with_host("evil.com", vec![ip("151.101.1.1")]),
    )
}

pub fn json_response(status: u16, body: &str) -> Result<FetchResponse, FetchError> {
    Ok(FetchResponse {
        status,
        content_type: Some("application/json".into()),
        body: body.to_string(),
    })
}

/// Answers from a script, repeating the last entry once the script runs out.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchResponse, FetchError>>>,
    last: Mutex<Option<Result<FetchResponse, FetchError>>>,
    seen: Mutex<Vec<FetchRequest>>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<FetchResponse, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn stalled(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(vec![json_response(200, "{}")])
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.seen.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(answer) => {
                *last = Some(answer.clone());
                answer
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(FetchError::Transport("script exhausted".into()))),
        }
    }
}

/// Records recovery navigations; optionally rebinds a host while doing so.
#[derive(Default)]
pub struct RecordingRecovery {
    pub visits: Mutex<Vec<(String, Vec<IpAddr>)>>,
    pub rebind: Option<(Arc<StaticResolver>, String, IpAddr)>,
}

#[async_trait]
impl AuthRecovery for RecordingRecovery {
    async fn recover(&self, recovery_url: &str, pinned_addrs: &[IpAddr]) -> Result<(), FetchError> {
        self.visits
            .lock()
            .unwrap()
            .push((recovery_url.to_string(), pinned_addrs.to_vec()));
        if let Some((resolver, host, addr)) = &self.rebind {
            resolver.set(host, vec![*addr]);
        }
        Ok(())
    }
}

pub fn template(name: &str, url_template: &str) -> Template {
    let now = Utc::now();
    let mut headers = BTreeMap::new();
    headers.insert("accept".to_string(), "application/json".to_string());
    Template {
        name: name.to_string(),
        task: "weather forecast".to_string(),
        url_template: url_template.to_string(),
        method: "GET".to_string(),
        headers,
        body: None,
        parameters: vec![Parameter {
            name: "city".to_string(),
            param_type: ParamType::String,
            required: false,
            source: ParamSource::Query,
            default: Some(serde_json::json!("Paris")),
            description: None,
        }],
        response_type: ResponseType::Structured,
        extraction: None,
        allowed_domains: vec!["example.com".to_string()],
        auth_recovery: AuthRecoveryPolicy::default(),
        baseline: Some(fingerprint(
            &serde_json::json!({"items": [{"id": 1, "name": "mon"}]}),
        )),
        status: LifecycleStatus::Draft,
        usage: UsageStats::default(),
        revision: 0,
        created_at: now,
        updated_at: now,
    }
}

pub struct Harness {
    pub engine: LiveCallEngine,
    pub store: Arc<FileTemplateStore>,
    pub resolver: Arc<StaticResolver>,
    pub fetcher: Arc<ScriptedFetcher>,
}

pub async fn harness(
    dir: &Path,
    fetcher: ScriptedFetcher,
    recovery: Option<Arc<RecordingRecovery>>,
    resolver: Arc<StaticResolver>,
) -> Harness {
    let mut config = Config::default();
    config.store_dir = dir.to_path_buf();
    let store = Arc::new(
        FileTemplateStore::open(dir, config.lifecycle.clone())
            .await
            .unwrap(),
    );
    let fetcher = Arc::new(fetcher);
    let mut builder = LiveCallEngine::builder(config)
        .with_store(store.clone())
        .with_resolver(resolver.clone())
        .with_fetcher(fetcher.clone());
    if let Some(recovery) = recovery {
        builder = builder.with_recovery(recovery);
    }
    Harness {
        engine: builder.build().await.unwrap(),
        store,
        resolver,
        fetcher,
    }
}

pub async fn seed(store: &FileTemplateStore, template: Template) -> Template {
    store.save(template).await.unwrap()
}
