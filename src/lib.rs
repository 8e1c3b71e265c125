//! SoulBrowser live-call engine.
//!
//! Learns the single data-producing request behind a browser task from a
//! captured trace, stores it as a parameterized template and replays it
//! through the live session with the egress guard re-checking every
//! transmission.

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod inflight;
pub mod replay;

pub use config::Config;
pub use engine::{LiveCallEngine, LiveCallEngineBuilder};
pub use errors::{LiveCallError, LiveCallResult};
pub use inflight::{InflightEntry, InflightGuard, InflightRegistry};
pub use replay::{
    AuthRecovery, FetchError, FetchRequest, FetchResponse, PageFetcher, ReplayConfig,
    ReplayControl, ReplayExecutor, ReplayFailure, ReplayResult,
};

pub use egress_guard::{EgressGuard, HostResolver, StaticResolver, SystemResolver};
pub use soulbrowser_core_types::{Candidate, Initiator, PageContext, RecordedCall};
pub use soulbrowser_templates::codec::placeholders::ParamValues;
pub use soulbrowser_templates::{
    CandidateChooser, ChooserDecision, ChooserRequest, LifecycleStatus, Template, TemplateStore,
};
