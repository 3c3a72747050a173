//! Error types for the Docket job system.

use thiserror::Error;

/// Failure to turn a function literal into a callable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("not a single function literal: {0}")]
    Shape(String),
}

/// Document-level errors. Always raised before anything is enqueued.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Field '{field}' could not be extracted: {source}")]
    Extraction {
        field: String,
        #[source]
        source: ExtractionError,
    },

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Field '{field}' must be {expected}")]
    InvalidField { field: String, expected: String },

    #[error("Invalid submission options: {0}")]
    InvalidOptions(String),
}

/// Capability resolution errors
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Unknown capability: {0}")]
    Unresolvable(String),

    #[error("Capability '{name}' failed to load: {message}")]
    Load { name: String, message: String },

    #[error("Module locator '{0}' is outside the permitted modules directory")]
    Forbidden(String),
}

/// Runtime failure of a job invocation
#[derive(Debug, Clone, Error)]
pub enum JobError {
    #[error("{0}")]
    Thrown(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Invalid stored document: {0}")]
    Document(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("{0}")]
    Stderr(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Job timed out after {0} ms")]
    Timeout(u64),

    #[error("Job returned without calling complete or fail")]
    Unsettled,

    #[error("Job attempt was cancelled")]
    Cancelled,
}

/// Queue backend errors (storage, serialization)
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for BackendError {
    fn from(err: sled::Error) -> Self {
        BackendError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Corrupt(err.to_string())
    }
}

/// Browser automation errors
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Page error: {0}")]
    Page(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Top-level error for dispatcher and CLI operations
#[derive(Debug, Error)]
pub enum DocketError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Job {queue}[{id}] not found")]
    NotFound { queue: String, id: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DocketError {
    fn from(err: config::ConfigError) -> Self {
        DocketError::ConfigError(err.to_string())
    }
}

impl From<BrowserError> for JobError {
    fn from(err: BrowserError) -> Self {
        JobError::Browser(err.to_string())
    }
}
