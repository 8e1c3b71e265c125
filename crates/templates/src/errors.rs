use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateErrorKind {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("storage conflict: {0}")]
    StorageConflict(String),
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("storage io: {0}")]
    Io(String),
    #[error("corrupt template file: {0}")]
    Corrupt(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(transparent)]
pub struct TemplateError(pub TemplateErrorKind);

pub type TemplateResult<T> = Result<T, TemplateError>;

impl TemplateError {
    pub fn new(kind: TemplateErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &TemplateErrorKind {
        &self.0
    }

    pub fn category(&self) -> &'static str {
        match self.0 {
            TemplateErrorKind::NotFound(_) => "not_found",
            TemplateErrorKind::StorageConflict(_) => "storage_conflict",
            TemplateErrorKind::InvalidTemplate(_) => "invalid_template",
            TemplateErrorKind::InvalidParameters(_) => "invalid_parameters",
            TemplateErrorKind::Io(_) => "storage_io",
            TemplateErrorKind::Corrupt(_) => "storage_corrupt",
        }
    }

    pub fn not_found(name: &str) -> Self {
        TemplateErrorKind::NotFound(name.to_string()).into()
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        TemplateErrorKind::StorageConflict(msg.into()).into()
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        TemplateErrorKind::InvalidParameters(msg.into()).into()
    }
}

impl From<TemplateErrorKind> for TemplateError {
    fn from(kind: TemplateErrorKind) -> Self {
        TemplateError(kind)
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(err: std::io::Error) -> Self {
        TemplateErrorKind::Io(err.to_string()).into()
    }
}
