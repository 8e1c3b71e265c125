//! Engine facade: learn a template from a trace, replay it, manage the store.

use std::sync::Arc;

use egress_guard::{EgressGuard, HostResolver, SystemResolver};
use network_tap_light::CallRanker;
use soulbrowser_core_types::{Candidate, PageContext, RecordedCall};
use soulbrowser_templates::codec::placeholders::ParamValues;
use soulbrowser_templates::synth::synthesize;
use soulbrowser_templates::{
    CandidateChooser, ChooserRequest, FileTemplateStore, LifecycleStatus, Outcome, Template,
    TemplateErrorKind, TemplateStore,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{LiveCallError, LiveCallResult};
use crate::inflight::InflightRegistry;
use crate::replay::{AuthRecovery, PageFetcher, ReplayControl, ReplayExecutor, ReplayResult};

pub struct LiveCallEngineBuilder {
    config: Config,
    store: Option<Arc<dyn TemplateStore>>,
    resolver: Option<Arc<dyn HostResolver>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    recovery: Option<Arc<dyn AuthRecovery>>,
}

impl LiveCallEngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            resolver: None,
            fetcher: None,
            recovery: None,
        }
    }

    /// Defaults to a [`FileTemplateStore`] under `config.store_dir`.
    pub fn with_store(mut self, store: Arc<dyn TemplateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to the system resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Without a fetcher the engine can learn and manage templates but not
    /// replay them.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn AuthRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub async fn build(self) -> LiveCallResult<LiveCallEngine> {
        self.config
            .validate()
            .map_err(|err| LiveCallError::Internal(format!("invalid config: {err}")))?;

        let store: Arc<dyn TemplateStore> = match self.store {
            Some(store) => store,
            None => Arc::new(
                FileTemplateStore::open(self.config.store_dir.clone(), self.config.lifecycle.clone())
                    .await?,
            ),
        };
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(SystemResolver));
        let guard = Arc::new(EgressGuard::with_config(resolver, self.config.guard.clone()));

        let executor = self.fetcher.map(|fetcher| {
            let executor =
                ReplayExecutor::new(Arc::clone(&guard), fetcher, self.config.replay.clone());
            match self.recovery {
                Some(recovery) => executor.with_recovery(recovery),
                None => executor,
            }
        });

        Ok(LiveCallEngine {
            ranker: CallRanker::new(self.config.ranker.clone()),
            config: self.config,
            store,
            guard,
            executor,
            inflight: InflightRegistry::new(),
        })
    }
}

pub struct LiveCallEngine {
    config: Config,
    store: Arc<dyn TemplateStore>,
    guard: Arc<EgressGuard>,
    ranker: CallRanker,
    executor: Option<ReplayExecutor>,
    inflight: InflightRegistry,
}

impl LiveCallEngine {
    pub fn builder(config: Config) -> LiveCallEngineBuilder {
        LiveCallEngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn guard(&self) -> &EgressGuard {
        &self.guard
    }

    pub fn inflight(&self) -> &InflightRegistry {
        &self.inflight
    }

    /// Top candidates of `calls` for `task`, best first.
    pub fn rank(&self, calls: &[RecordedCall], page: &PageContext, task: &str) -> Vec<Candidate> {
        self.ranker.rank(calls, page, task, self.config.ranker.top_k)
    }

    /// Ranks the trace, asks `chooser` to pick a call and persists the
    /// resulting draft. `Ok(None)` when the trace has no candidates or the
    /// chooser declines.
    pub async fn learn(
        &self,
        calls: &[RecordedCall],
        page: &PageContext,
        task: &str,
        chooser: &dyn CandidateChooser,
    ) -> LiveCallResult<Option<Template>> {
        let candidates = self.rank(calls, page, task);
        if candidates.is_empty() {
            info!(calls = calls.len(), "trace has no replayable candidates");
            return Ok(None);
        }
        let request = ChooserRequest::new(
            task,
            page.url.clone(),
            &candidates,
            self.config.ranker.snippet_chars,
        );
        let Some(decision) = chooser.choose(&request).await? else {
            info!(candidates = candidates.len(), "chooser declined every candidate");
            return Ok(None);
        };
        debug!(selected = decision.selected, name = %decision.name, "chooser decision received");

        let mut template = synthesize(&decision, &candidates, task)?;
        // synthesize has already bounds-checked the index.
        if let Some(candidate) = candidates.get(decision.selected) {
            self.guard
                .validate_domain(&candidate.call.url, &template.allowed_domains)
                .await
                .into_result()
                .map_err(|err| {
                    warn!(template = %template.name, reason = %err.reason(), "learned call failed the egress guard");
                    LiveCallError::from(err)
                })?;
        }

        match self.store.load(&template.name).await {
            Ok(existing) => {
                info!(template = %template.name, previous = %existing.status, "re-learning existing template");
                template.revision = existing.revision;
            }
            Err(err) if matches!(err.kind(), TemplateErrorKind::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let saved = self.store.save(template).await?;
        info!(
            template = %saved.name,
            host = %saved.host().unwrap_or_default(),
            params = saved.parameters.len(),
            "template learned"
        );
        Ok(Some(saved))
    }

    /// Replays the named template and records the outcome.
    ///
    /// Cancellation, timeouts, transport errors and bad parameters leave the
    /// template untouched. Guard blocks count as failures.
    pub async fn execute(
        &self,
        name: &str,
        params: &ParamValues,
        control: &ReplayControl,
    ) -> LiveCallResult<ReplayResult> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| LiveCallError::Internal("no live session attached".into()))?;
        let template = self.store.load(name).await?;
        if template.status == LifecycleStatus::Deprecated {
            warn!(template = %name, "replaying deprecated template; re-learn to restore it");
        }

        let _running = self.inflight.begin(name);
        match executor.execute(&template, params, control).await {
            Ok(result) => {
                let outcome = if result.success {
                    Outcome::Success {
                        similarity: result.similarity,
                    }
                } else {
                    Outcome::Failure
                };
                if let Some(failure) = &result.failure {
                    info!(template = %name, status = result.status, category = %failure.category, "replay failed");
                }
                if let Some(similarity) = result.similarity {
                    if similarity < self.config.lifecycle.drift_threshold {
                        warn!(template = %name, similarity, "response shape drifted from baseline");
                    }
                }
                self.record(name, outcome).await;
                Ok(result)
            }
            Err(err) => {
                if err.counts_as_template_failure() {
                    warn!(template = %name, category = err.category(), "replay blocked");
                    self.record(name, Outcome::Failure).await;
                } else {
                    debug!(template = %name, category = err.category(), "replay aborted");
                }
                Err(err)
            }
        }
    }

    async fn record(&self, name: &str, outcome: Outcome) {
        if let Err(err) = self.store.record_outcome(name, outcome).await {
            warn!(template = %name, error = %err, "failed to record replay outcome");
        }
    }

    pub async fn list(&self) -> LiveCallResult<Vec<Template>> {
        Ok(self.store.list_all().await?)
    }

    pub async fn get(&self, name: &str) -> LiveCallResult<Template> {
        Ok(self.store.load(name).await?)
    }

    pub async fn delete(&self, name: &str) -> LiveCallResult<()> {
        Ok(self.store.delete(name).await?)
    }
}
