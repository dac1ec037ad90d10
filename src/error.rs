//! Error types for the dialogue orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Chart error: {0}")]
    ChartError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Failure of a single tool call.
///
/// Scoped to one request of a batch: the execution node turns it into an
/// error result message and latches it into the conversation state, then
/// moves on to the next request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The conversation state does not allow this call yet
    /// (e.g. preprocessing before any data was fetched).
    #[error("{0}")]
    Precondition(String),

    /// The upstream data provider refused the call (quota, rate limit).
    #[error("data provider quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The tool rejected its own arguments (unknown column, chart type...).
    #[error("{0}")]
    Validation(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Anything else raised by the collaborator.
    #[error("{0}")]
    Upstream(String),
}

impl From<OrchestrationError> for ToolError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::ChartError(msg) => ToolError::Validation(msg),
            other => ToolError::Upstream(other.to_string()),
        }
    }
}
