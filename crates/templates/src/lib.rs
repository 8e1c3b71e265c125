pub mod codec;
pub mod errors;
pub mod lifecycle;
pub mod model;
pub mod policy;
pub mod storage;
pub mod synth;

pub use codec::shape::{drift_similarity, fingerprint, similarity, Fingerprint};
pub use errors::{TemplateError, TemplateErrorKind, TemplateResult};
pub use lifecycle::{apply_outcome, Outcome, Transition};
pub use model::{
    AuthRecoveryPolicy, BodyEncoding, BodyTemplate, LifecycleStatus, ParamSource, ParamType,
    Parameter, ResponseType, Template, UsageStats,
};
pub use policy::LifecyclePolicy;
pub use storage::{FileTemplateStore, TemplateStore};
pub use synth::{
    CandidateChooser, CandidateSummary, ChooserDecision, ChooserRequest, ParameterSpec, SynthError,
};
