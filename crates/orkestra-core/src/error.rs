use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`OrkestraError`].
pub type OrkestraResult<T> = Result<T, OrkestraError>;

/// Top-level error type for the Orkestra orchestrator.
///
/// Each variant is a stable, typed failure mode; callers match on the variant
/// (or on [`OrkestraError::kind`]) instead of parsing messages.
#[derive(Error, Debug)]
pub enum OrkestraError {
    /// A job request was malformed, oversized or carried sensitive data.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An agent definition failed semantic validation.
    #[error("Registration error: {0}")]
    Registration(String),

    /// An agent with the same id is already registered.
    #[error("Duplicate agent: {0}")]
    DuplicateAgent(String),

    /// The referenced agent (or job) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The agent is executing a job and cannot be removed.
    #[error("Agent busy: {0}")]
    Busy(String),

    /// No idle agent matches the requested capability.
    #[error("Routing error: {0}")]
    Routing(String),

    /// Granted permissions do not cover what the capability requires.
    #[error("Permission error: {0}")]
    Permission(String),

    /// No execution backend is wired for the agent's runtime kind.
    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// A job or backend call exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The execution backend reported a failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An agent definition file could not be read, parsed or is missing a section.
    #[error("Load error: {0}")]
    Load(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of [`OrkestraError`], suitable for storing on a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ErrorKind {
    Validation,
    Registration,
    DuplicateAgent,
    NotFound,
    Busy,
    Routing,
    Permission,
    UnsupportedRuntime,
    Timeout,
    Execution,
    Load,
    Config,
    Serialization,
    Io,
}

impl OrkestraError {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrkestraError::Validation(_) => ErrorKind::Validation,
            OrkestraError::Registration(_) => ErrorKind::Registration,
            OrkestraError::DuplicateAgent(_) => ErrorKind::DuplicateAgent,
            OrkestraError::NotFound(_) => ErrorKind::NotFound,
            OrkestraError::Busy(_) => ErrorKind::Busy,
            OrkestraError::Routing(_) => ErrorKind::Routing,
            OrkestraError::Permission(_) => ErrorKind::Permission,
            OrkestraError::UnsupportedRuntime(_) => ErrorKind::UnsupportedRuntime,
            OrkestraError::Timeout(_) => ErrorKind::Timeout,
            OrkestraError::Execution(_) => ErrorKind::Execution,
            OrkestraError::Load(_) => ErrorKind::Load,
            OrkestraError::Config(_) => ErrorKind::Config,
            OrkestraError::Serialization(_) => ErrorKind::Serialization,
            OrkestraError::Io(_) => ErrorKind::Io,
        }
    }

    /// The message without the kind prefix that `Display` adds.
    pub fn detail(&self) -> String {
        match self {
            OrkestraError::Validation(m)
            | OrkestraError::Registration(m)
            | OrkestraError::DuplicateAgent(m)
            | OrkestraError::NotFound(m)
            | OrkestraError::Busy(m)
            | OrkestraError::Routing(m)
            | OrkestraError::Permission(m)
            | OrkestraError::UnsupportedRuntime(m)
            | OrkestraError::Timeout(m)
            | OrkestraError::Execution(m)
            | OrkestraError::Load(m)
            | OrkestraError::Config(m) => m.clone(),
            OrkestraError::Serialization(e) => e.to_string(),
            OrkestraError::Io(e) => e.to_string(),
        }
    }
}

/// A typed error frozen onto a terminal job.
///
/// `message` holds [`OrkestraError::detail`], so `to_error().to_string()`
/// reproduces the original display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// What kind of failure ended the job.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl JobError {
    /// Rebuild an [`OrkestraError`] carrying the same kind and message.
    ///
    /// `Serialization` and `Io` cannot be reconstructed from a message and come
    /// back as `Execution`.
    pub fn to_error(&self) -> OrkestraError {
        let msg = self.message.clone();
        match self.kind {
            ErrorKind::Validation => OrkestraError::Validation(msg),
            ErrorKind::Registration => OrkestraError::Registration(msg),
            ErrorKind::DuplicateAgent => OrkestraError::DuplicateAgent(msg),
            ErrorKind::NotFound => OrkestraError::NotFound(msg),
            ErrorKind::Busy => OrkestraError::Busy(msg),
            ErrorKind::Routing => OrkestraError::Routing(msg),
            ErrorKind::Permission => OrkestraError::Permission(msg),
            ErrorKind::UnsupportedRuntime => OrkestraError::UnsupportedRuntime(msg),
            ErrorKind::Timeout => OrkestraError::Timeout(msg),
            ErrorKind::Load => OrkestraError::Load(msg),
            ErrorKind::Config => OrkestraError::Config(msg),
            ErrorKind::Execution | ErrorKind::Serialization | ErrorKind::Io => {
                OrkestraError::Execution(msg)
            }
        }
    }
}

impl From<&OrkestraError> for JobError {
    fn from(err: &OrkestraError) -> Self {
        Self {
            kind: err.kind(),
            message: err.detail(),
        }
    }
}
