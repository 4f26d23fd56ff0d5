use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One citation in the final answer. `index` is the 1-based `[n]` marker the
/// answer text refers to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub index: usize,
    pub chunk_id: String,
    pub snippet: String,
    pub section: Option<String>,
    pub document_id: String,
    pub content_type: String,
}

stored_object!(Query, "query", {
    query_text: String,
    document_filter: Option<Vec<String>>,
    debug_mode: bool,
    status: QueryStatus,
    answer: Option<String>,
    citations: Vec<Citation>,
    debug_data: Option<serde_json::Value>,
    latency_ms: Option<u64>,
    error_message: Option<String>
});

impl Query {
    pub fn new(query_text: String, document_filter: Option<Vec<String>>, debug_mode: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            query_text,
            document_filter,
            debug_mode,
            status: QueryStatus::Pending,
            answer: None,
            citations: Vec::new(),
            debug_data: None,
            latency_ms: None,
            error_message: None,
        }
    }

    pub async fn mark_processing(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('query', $id) SET status = 'processing', updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .await?;
        Ok(())
    }

    /// The single final-state mutation: answer, ordered citations, debug data
    /// and total latency land together.
    pub async fn complete(
        id: &str,
        answer: String,
        citations: Vec<Citation>,
        debug_data: Option<serde_json::Value>,
        latency_ms: u64,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('query', $id) SET
                status = 'completed',
                answer = $answer,
                citations = $citations,
                debug_data = $debug_data,
                latency_ms = $latency_ms,
                updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .bind(("answer", answer))
        .bind(("citations", citations))
        .bind(("debug_data", debug_data))
        .bind(("latency_ms", latency_ms))
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        id: &str,
        message: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('query', $id) SET
                status = 'failed',
                error_message = $message,
                updated_at = time::now();",
        )
        .bind(("id", id.to_string()))
        .bind(("message", message))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_writes_answer_citations_and_latency() {
        let db = SurrealDbClient::memory("query_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        let query = Query::new("what is the refund policy?".into(), None, true);
        let id = query.id.clone();
        db.store_item(query).await.expect("store");

        Query::mark_processing(&id, &db).await.expect("processing");

        let citations = vec![Citation {
            index: 1,
            chunk_id: "chunk-1".into(),
            snippet: "Refunds are issued within 30 days".into(),
            section: Some("Returns".into()),
            document_id: "doc-1".into(),
            content_type: "chunk".into(),
        }];
        Query::complete(
            &id,
            "Refunds are issued within 30 days [1].".into(),
            citations.clone(),
            Some(serde_json::json!({"iterations": []})),
            412,
            &db,
        )
        .await
        .expect("complete");

        let stored: Query = db.get_item(&id).await.expect("get").expect("present");
        assert_eq!(stored.status, QueryStatus::Completed);
        assert_eq!(stored.citations, citations);
        assert_eq!(stored.latency_ms, Some(412));
        assert!(stored.answer.unwrap().contains("[1]"));
    }

    #[tokio::test]
    async fn failures_record_the_message() {
        let db = SurrealDbClient::memory("query_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        let query = Query::new("q".into(), Some(vec!["doc-1".into()]), false);
        let id = query.id.clone();
        db.store_item(query).await.expect("store");

        Query::mark_failed(&id, "embedding provider down".into(), &db)
            .await
            .expect("fail");

        let stored: Query = db.get_item(&id).await.expect("get").expect("present");
        assert_eq!(stored.status, QueryStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("embedding provider down")
        );
    }
}
