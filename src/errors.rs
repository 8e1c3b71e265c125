//! Error taxonomy for the live-call engine.
//!
//! Every variant carries a stable category string. Messages name hosts,
//! statuses and template names but never request bodies, header values or
//! credentials.

use egress_guard::{BlockReason, GuardError};
use soulbrowser_templates::{SynthError, TemplateError, TemplateErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveCallError {
    #[error("blocked: {0}")]
    ValidationBlocked(BlockReason),
    #[error("resolution failed: {0}")]
    ResolutionFailed(BlockReason),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("authentication required (status {status})")]
    AuthRequired { status: u16 },
    #[error("transport error: {0}")]
    TransientTransport(String),
    #[error("replay cancelled")]
    Cancelled,
    #[error("storage conflict: {0}")]
    StorageConflict(String),
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LiveCallResult<T> = Result<T, LiveCallError>;

impl LiveCallError {
    pub fn category(&self) -> &'static str {
        match self {
            LiveCallError::ValidationBlocked(_) => "validation_blocked",
            LiveCallError::ResolutionFailed(_) => "resolution_failed",
            LiveCallError::ExtractionFailed(_) => "extraction_failed",
            LiveCallError::AuthRequired { .. } => "auth_required",
            LiveCallError::TransientTransport(_) => "transient_transport",
            LiveCallError::Cancelled => "cancelled",
            LiveCallError::StorageConflict(_) => "storage_conflict",
            LiveCallError::NotFound(_) => "not_found",
            LiveCallError::InvalidDecision(_) => "invalid_decision",
            LiveCallError::InvalidParameters(_) => "invalid_parameters",
            LiveCallError::Internal(_) => "internal",
        }
    }

    /// Safety failures count against a template; transport trouble,
    /// cancellation and caller mistakes do not.
    pub fn counts_as_template_failure(&self) -> bool {
        matches!(
            self,
            LiveCallError::ValidationBlocked(_) | LiveCallError::ResolutionFailed(_)
        )
    }

    /// `category: message`, suitable for showing to a user.
    pub fn user_message(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

impl From<GuardError> for LiveCallError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Blocked(reason) => LiveCallError::ValidationBlocked(reason),
            GuardError::ResolutionFailed(reason) => LiveCallError::ResolutionFailed(reason),
        }
    }
}

impl From<TemplateError> for LiveCallError {
    fn from(err: TemplateError) -> Self {
        match err.0 {
            TemplateErrorKind::NotFound(name) => LiveCallError::NotFound(name),
            TemplateErrorKind::StorageConflict(msg) => LiveCallError::StorageConflict(msg),
            TemplateErrorKind::InvalidParameters(msg) => LiveCallError::InvalidParameters(msg),
            TemplateErrorKind::InvalidTemplate(msg) => LiveCallError::InvalidDecision(msg),
            TemplateErrorKind::Io(msg) | TemplateErrorKind::Corrupt(msg) => {
                LiveCallError::Internal(msg)
            }
        }
    }
}

impl From<SynthError> for LiveCallError {
    fn from(err: SynthError) -> Self {
        match err {
            SynthError::Chooser(msg) => LiveCallError::Internal(format!("chooser: {msg}")),
            other => LiveCallError::InvalidDecision(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_errors_keep_their_category() {
        let blocked: LiveCallError = GuardError::Blocked(BlockReason::EmbeddedCredentials).into();
        assert_eq!(blocked.category(), "validation_blocked");
        assert!(blocked.counts_as_template_failure());

        let unresolved: LiveCallError = GuardError::ResolutionFailed(BlockReason::ResolutionFailed {
            host: "nowhere.test".into(),
        })
        .into();
        assert_eq!(unresolved.category(), "resolution_failed");
        assert!(unresolved.user_message().starts_with("resolution_failed: "));
    }

    #[test]
    fn transport_and_cancellation_do_not_count() {
        assert!(!LiveCallError::Cancelled.counts_as_template_failure());
        assert!(!LiveCallError::TransientTransport("reset".into()).counts_as_template_failure());
    }

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let err: LiveCallError = TemplateError::conflict("stale").into();
        assert_eq!(err.category(), "storage_conflict");
        let err: LiveCallError = TemplateError::not_found("x").into();
        assert_eq!(err.category(), "not_found");
    }
}
