//! SoulBrowser L0 network tap (light).
//!
//! Assembles [`RecordedCall`]s per page from browser network events and
//! ranks them with [`rank::CallRanker`]. A trace is the ordered set of calls
//! one task produced; [`NetworkTapLight::drain`] hands it over in request
//! start order.

pub mod config;
pub mod rank;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TapConfig;
use dashmap::DashMap;
use soulbrowser_core_types::{truncate_with_marker, Initiator};
pub use soulbrowser_core_types::{PageContext, PageId, RecordedCall};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use crate::config::{RankWeights, RankerConfig};
pub use crate::rank::{rank, task_tokens, CallRanker};

/// Errors emitted by the tap surface.
#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("page not enabled")]
    PageNotEnabled,
    #[error("unknown request id: {0}")]
    UnknownRequest(String),
}

/// CDP-inspired events understood by the tap.
#[derive(Clone, Debug)]
pub enum TapEvent {
    RequestWillBeSent {
        request_id: String,
        url: String,
        method: String,
        headers: BTreeMap<String, String>,
        post_data: Option<String>,
        resource_type: String,
    },
    ResponseReceived {
        request_id: String,
        status: u16,
        content_type: Option<String>,
    },
    LoadingFinished {
        request_id: String,
        body: Option<String>,
        encoded_length: Option<u64>,
    },
    LoadingFailed {
        request_id: String,
    },
}

/// Published whenever a call completes.
#[derive(Clone, Debug)]
pub struct CompletedCall {
    pub page: PageId,
    pub call: RecordedCall,
}

pub type CallBus = broadcast::Sender<CompletedCall>;

struct Pending {
    seq: u64,
    started: Instant,
    call: RecordedCall,
    responded: bool,
}

#[derive(Default)]
struct PageTrace {
    next_seq: u64,
    inflight: HashMap<String, Pending>,
    completed: Vec<(u64, RecordedCall)>,
}

impl PageTrace {
    fn begin(&mut self, request_id: String, call: RecordedCall, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.inflight.insert(
            request_id,
            Pending {
                seq,
                started: now,
                call,
                responded: false,
            },
        );
    }

    fn complete(&mut self, seq: u64, call: RecordedCall, cap: usize) {
        self.completed.push((seq, call));
        if self.completed.len() > cap {
            // Oldest by request start order goes first.
            self.completed.sort_by_key(|(seq, _)| *seq);
            let excess = self.completed.len() - cap;
            self.completed.drain(0..excess);
        }
    }

    fn ordered(&self) -> Vec<RecordedCall> {
        let mut calls = self.completed.clone();
        calls.sort_by_key(|(seq, _)| *seq);
        calls.into_iter().map(|(_, call)| call).collect()
    }
}

pub struct NetworkTapLight {
    pub bus: CallBus,
    states: DashMap<PageId, Arc<Mutex<PageTrace>>>,
    config: TapConfig,
}

/// Handle returned by [`NetworkTapLight::spawn_maintenance`] for lifecycle control.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Gracefully stop the maintenance loop and await its completion.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl NetworkTapLight {
    pub fn new(buffer: usize) -> (Self, broadcast::Receiver<CompletedCall>) {
        Self::with_config(TapConfig::default(), buffer)
    }

    pub fn with_config(
        config: TapConfig,
        buffer: usize,
    ) -> (Self, broadcast::Receiver<CompletedCall>) {
        let (tx, rx) = broadcast::channel(buffer.max(1));
        (
            Self {
                bus: tx,
                states: DashMap::new(),
                config,
            },
            rx,
        )
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Spawn a background task that periodically calls [`evaluate_timeouts`](Self::evaluate_timeouts).
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let tap = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let tick_interval = Duration::from_millis(self.config.maintenance_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        tap.evaluate_timeouts().await;
                    }
                }
            }
        });
        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }

    pub async fn enable(&self, page: PageId) -> Result<(), TapError> {
        self.states
            .entry(page)
            .or_insert_with(|| Arc::new(Mutex::new(PageTrace::default())));
        Ok(())
    }

    pub async fn disable(&self, page: &PageId) -> Result<(), TapError> {
        self.states
            .remove(page)
            .map(|_| ())
            .ok_or(TapError::PageNotEnabled)
    }

    fn state(&self, page: &PageId) -> Result<Arc<Mutex<PageTrace>>, TapError> {
        self.states
            .get(page)
            .map(|entry| entry.value().clone())
            .ok_or(TapError::PageNotEnabled)
    }

    pub async fn ingest(&self, page: &PageId, event: TapEvent) -> Result<(), TapError> {
        let state = self.state(page)?;
        let now = Instant::now();
        let mut trace = state.lock().await;

        match event {
            TapEvent::RequestWillBeSent {
                request_id,
                url,
                method,
                headers,
                post_data,
                resource_type,
            } => {
                let mut call = RecordedCall::new(url, method, 0)
                    .with_initiator(Initiator::from_resource_type(&resource_type));
                call.request_headers = headers;
                call.request_body = post_data;
                trace!(page = %page, request_id = %request_id, "request started");
                trace.begin(request_id, call, now);
            }
            TapEvent::ResponseReceived {
                request_id,
                status,
                content_type,
            } => {
                let pending = trace
                    .inflight
                    .get_mut(&request_id)
                    .ok_or(TapError::UnknownRequest(request_id))?;
                pending.call.status = status;
                pending.call.content_type = content_type;
                pending.responded = true;
            }
            TapEvent::LoadingFinished {
                request_id,
                body,
                encoded_length,
            } => {
                let pending = trace
                    .inflight
                    .remove(&request_id)
                    .ok_or_else(|| TapError::UnknownRequest(request_id.clone()))?;
                if !pending.responded {
                    debug!(page = %page, request_id = %request_id, "finished without response; dropped");
                    return Ok(());
                }
                let mut call = pending.call;
                if let Some(body) = body {
                    let full_len = body.len() as u64;
                    let (body, truncated) = truncate_with_marker(body, self.config.max_body_bytes);
                    call.response_body = Some(body);
                    call.body_truncated = truncated;
                    call.response_size = Some(encoded_length.unwrap_or(0).max(full_len));
                } else {
                    call.response_size = encoded_length;
                }
                trace.complete(pending.seq, call.clone(), self.config.max_calls_per_page);
                drop(trace);
                let _ = self.bus.send(CompletedCall {
                    page: page.clone(),
                    call,
                });
            }
            TapEvent::LoadingFailed { request_id } => {
                trace.inflight.remove(&request_id);
            }
        }
        Ok(())
    }

    /// Completed calls for `page` in request start order, leaving them in place.
    pub async fn snapshot(&self, page: &PageId) -> Option<Vec<RecordedCall>> {
        let state = self.state(page).ok()?;
        let trace = state.lock().await;
        Some(trace.ordered())
    }

    /// Takes the completed calls for `page`, in request start order.
    pub async fn drain(&self, page: &PageId) -> Result<Vec<RecordedCall>, TapError> {
        let state = self.state(page)?;
        let mut trace = state.lock().await;
        let calls = trace.ordered();
        trace.completed.clear();
        Ok(calls)
    }

    /// Evicts requests in flight longer than the configured timeout. Requests
    /// that already have a response are kept as body-less calls.
    pub async fn evaluate_timeouts(&self) {
        let now = Instant::now();
        let timeout = Duration::from_millis(self.config.inflight_timeout_ms);
        let states: Vec<(PageId, Arc<Mutex<PageTrace>>)> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (page, state) in states {
            let mut trace = state.lock().await;
            let expired: Vec<String> = trace
                .inflight
                .iter()
                .filter(|(_, pending)| now.saturating_duration_since(pending.started) >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for request_id in expired {
                if let Some(pending) = trace.inflight.remove(&request_id) {
                    debug!(page = %page, request_id = %request_id, "evicting stale request");
                    if pending.responded {
                        trace.complete(pending.seq, pending.call, self.config.max_calls_per_page);
                    }
                }
            }
        }
    }
}
