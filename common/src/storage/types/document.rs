use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Processing lifecycle of an uploaded document. Only the ingestion worker
/// moves a document past `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

stored_object!(Document, "document", {
    filename: String,
    mime_type: String,
    size_bytes: u64,
    status: DocumentStatus,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processing_started_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processing_completed_at: Option<DateTime<Utc>>,
    chunk_count: u32,
    vector_count: u32,
    qa_pairs_count: u32,
    language: Option<String>,
    is_multilingual: bool,
    summary: Option<String>,
    chunking_strategy: Option<String>,
    tags: Vec<String>,
    error_message: Option<String>
});

/// Derived values written when ingestion finishes successfully.
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub chunk_count: u32,
    pub vector_count: u32,
    pub qa_pairs_count: u32,
    pub summary: Option<String>,
    pub language: Option<String>,
    pub is_multilingual: bool,
    pub chunking_strategy: String,
}

impl Document {
    pub fn new(filename: String, mime_type: String, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            filename,
            mime_type,
            size_bytes,
            status: DocumentStatus::Pending,
            processing_started_at: None,
            processing_completed_at: None,
            chunk_count: 0,
            vector_count: 0,
            qa_pairs_count: 0,
            language: None,
            is_multilingual: false,
            summary: None,
            chunking_strategy: None,
            tags: Vec::new(),
            error_message: None,
        }
    }

    pub async fn mark_processing(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('document', $id) SET
                status = 'processing',
                processing_started_at = time::now(),
                error_message = NONE,
                updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .await?;
        Ok(())
    }

    pub async fn mark_completed(
        id: &str,
        outcome: IngestionOutcome,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('document', $id) SET
                status = 'completed',
                chunk_count = $chunk_count,
                vector_count = $vector_count,
                qa_pairs_count = $qa_pairs_count,
                summary = $summary,
                language = $language,
                is_multilingual = $is_multilingual,
                chunking_strategy = $chunking_strategy,
                processing_completed_at = time::now(),
                updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .bind(("chunk_count", outcome.chunk_count))
        .bind(("vector_count", outcome.vector_count))
        .bind(("qa_pairs_count", outcome.qa_pairs_count))
        .bind(("summary", outcome.summary))
        .bind(("language", outcome.language))
        .bind(("is_multilingual", outcome.is_multilingual))
        .bind(("chunking_strategy", outcome.chunking_strategy))
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        id: &str,
        message: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('document', $id) SET
                status = 'failed',
                error_message = $message,
                processing_completed_at = time::now(),
                updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .bind(("message", message))
        .await?;
        Ok(())
    }

    /// Newest-first listing, optionally filtered by status.
    pub async fn list(
        db: &SurrealDbClient,
        status: Option<DocumentStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Self>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(0);

        let mut response = match status {
            Some(status) => {
                db.query(
                    "SELECT * FROM document WHERE status = $status
                     ORDER BY created_at DESC LIMIT $limit START $offset;",
                )
                .bind(("status", status))
                .bind(("limit", limit))
                .bind(("offset", offset))
                .await?
            }
            None => {
                db.query(
                    "SELECT * FROM document ORDER BY created_at DESC LIMIT $limit START $offset;",
                )
                .bind(("limit", limit))
                .bind(("offset", offset))
                .await?
            }
        };

        let documents: Vec<Self> = response.take(0)?;
        Ok(documents)
    }
}
