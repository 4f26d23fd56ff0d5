use std::time::Duration;

use uuid::Uuid;

use super::ingestion_task::{JobStatus, TaskErrorInfo};
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(QueryTask, "query_job", {
    query_id: String,
    query_text: String,
    document_filter: Option<Vec<String>>,
    debug_mode: bool,
    top_k: Option<usize>,
    rerank_top: Option<usize>,
    correlation_id: Option<String>,
    status: JobStatus,
    attempts: u32,
    worker_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    lease_until: Option<DateTime<Utc>>,
    last_error: Option<TaskErrorInfo>
});

impl QueryTask {
    pub fn new(
        query_id: String,
        query_text: String,
        document_filter: Option<Vec<String>>,
        debug_mode: bool,
        top_k: Option<usize>,
        rerank_top: Option<usize>,
        correlation_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            query_id,
            query_text,
            document_filter,
            debug_mode,
            top_k,
            rerank_top,
            correlation_id,
            status: JobStatus::Pending,
            attempts: 0,
            worker_id: None,
            lease_until: None,
            last_error: None,
        }
    }

    pub async fn enqueue(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await?;
        Ok(())
    }

    /// Claims the oldest ready query job. Query jobs are not retried: a
    /// failed query is reported to the user immediately, so the only
    /// reclaimable state besides `pending` is an expired lease.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Self>, AppError> {
        let lease_until = now + chrono::Duration::from_std(lease).unwrap_or_default();

        // A single statement keeps the select-and-claim atomic.
        let sql = "
            UPDATE (SELECT VALUE id FROM type::table($tb)
                WHERE status = 'pending'
                   OR (status = 'processing' AND lease_until != NONE AND lease_until < $now)
                ORDER BY created_at ASC
                LIMIT 1)
            SET
                status = 'processing',
                worker_id = $worker,
                attempts += 1,
                lease_until = $lease_until,
                updated_at = time::now()
            RETURN AFTER;
        ";

        let mut response = db
            .query(sql)
            .bind(("tb", Self::table_name()))
            .bind(("now", surrealdb::sql::Datetime::from(now)))
            .bind(("worker", worker_id.to_string()))
            .bind(("lease_until", surrealdb::sql::Datetime::from(lease_until)))
            .await?;

        let claimed: Vec<Self> = response.take(0)?;
        Ok(claimed.into_iter().next())
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($tb, $id) SET
                status = 'succeeded',
                lease_until = NONE,
                updated_at = time::now();",
        )
        .bind(("tb", Self::table_name()))
        .bind(("id", self.id.clone()))
        .await?;
        Ok(())
    }

    pub async fn mark_dead_letter(
        &self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($tb, $id) SET
                status = 'dead_letter',
                lease_until = NONE,
                last_error = $error,
                updated_at = time::now();",
        )
        .bind(("tb", Self::table_name()))
        .bind(("id", self.id.clone()))
        .bind(("error", error))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_and_ack_round_trip() {
        let db = SurrealDbClient::memory("query_job_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        QueryTask::new(
            "query-1".into(),
            "how do refunds work?".into(),
            None,
            false,
            None,
            None,
            Some("corr-1".into()),
        )
        .enqueue(&db)
        .await
        .expect("enqueue");

        let claimed = QueryTask::claim_next_ready(&db, "qw-1", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.query_id, "query-1");
        assert_eq!(claimed.status, JobStatus::Processing);

        claimed.mark_succeeded(&db).await.expect("ack");

        let drained = QueryTask::claim_next_ready(&db, "qw-1", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(drained.is_none());
    }

    #[tokio::test]
    async fn dead_letter_is_terminal() {
        let db = SurrealDbClient::memory("query_job_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        QueryTask::new("query-2".into(), "q".into(), None, false, None, None, None)
            .enqueue(&db)
            .await
            .expect("enqueue");

        let claimed = QueryTask::claim_next_ready(&db, "qw", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job");
        claimed
            .mark_dead_letter(
                TaskErrorInfo {
                    code: None,
                    message: "reranker failure".into(),
                },
                &db,
            )
            .await
            .expect("dead letter");

        let later = Utc::now() + chrono::Duration::days(1);
        assert!(
            QueryTask::claim_next_ready(&db, "qw", later, Duration::from_secs(60))
                .await
                .expect("claim")
                .is_none()
        );
    }
}
