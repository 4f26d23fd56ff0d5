use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Core error surface shared by every crate in the workspace.
///
/// Variants map one-to-one onto the error codes exposed over HTTP; see
/// [`AppError::error_code`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("External service error from {service}: {message}")]
    ExternalService {
        service: String,
        status: Option<u16>,
        message: String,
    },
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Document processing error during {stage}: {message}")]
    DocumentProcessing { stage: String, message: String },
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Timed out after {0}s")]
    Timeout(u64),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable machine-readable code, used verbatim in HTTP error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::OpenAI(_) | Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ObjectStore(_) => "STORAGE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::Retrieval(_) => "RETRIEVAL_ERROR",
            Self::DocumentProcessing { .. } => "DOCUMENT_PROCESSING_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::LLMParsing(_) => "LLM_PARSING_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Join(_) | Self::Io(_) | Self::Anyhow(_) | Self::InternalError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Structured details for the HTTP error body.
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => {
                serde_json::json!({ "retry_after_seconds": retry_after_secs })
            }
            Self::ExternalService {
                service, status, ..
            } => serde_json::json!({ "service_name": service, "status_code": status }),
            Self::DocumentProcessing { stage, .. } => serde_json::json!({ "stage": stage }),
            _ => serde_json::Value::Null,
        }
    }

    /// Whether a provider explicitly signalled that a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::Timeout(_) => true,
            Self::ExternalService { status, .. } => {
                matches!(status, Some(429 | 500 | 502 | 503 | 504))
            }
            Self::OpenAI(err) => match err {
                OpenAIError::Reqwest(_) => true,
                OpenAIError::ApiError(api) => matches!(
                    api.r#type.as_deref(),
                    Some("server_error" | "rate_limit_exceeded" | "insufficient_quota")
                ),
                _ => false,
            },
            _ => false,
        }
    }
}
