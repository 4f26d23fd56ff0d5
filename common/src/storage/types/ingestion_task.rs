use std::time::Duration;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Queue states for a durable job row. `Scheduled` is a failed attempt
/// waiting out its backoff; `DeadLetter` jobs are never claimed again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Scheduled,
    Succeeded,
    DeadLetter,
}

/// Error info recorded on a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

stored_object!(IngestionTask, "ingestion_job", {
    document_id: String,
    file_path: String,
    original_filename: String,
    mime_type: Option<String>,
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
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<TaskErrorInfo>
});

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: u64 = 600;

impl IngestionTask {
    pub fn new(
        document_id: String,
        file_path: String,
        original_filename: String,
        mime_type: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            file_path,
            original_filename,
            mime_type,
            correlation_id,
            status: JobStatus::Pending,
            attempts: 0,
            worker_id: None,
            lease_until: None,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Enqueues the job.
    pub async fn enqueue(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await?;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < MAX_ATTEMPTS
    }

    /// Atomically claims the oldest ready job for this worker. A job is ready
    /// when it is pending, scheduled past its backoff, or processing under an
    /// expired lease (a crashed worker). One job per call keeps each worker a
    /// strictly sequential consumer.
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
                   OR (status = 'scheduled' AND next_attempt_at != NONE AND next_attempt_at <= $now)
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

    /// Records a failed attempt and schedules the retry after `delay`.
    pub async fn mark_failed(
        &self,
        error: TaskErrorInfo,
        delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let next_attempt =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        db.query(
            "UPDATE type::thing($tb, $id) SET
                status = 'scheduled',
                lease_until = NONE,
                next_attempt_at = $next_attempt,
                last_error = $error,
                updated_at = time::now();",
        )
        .bind(("tb", Self::table_name()))
        .bind(("id", self.id.clone()))
        .bind(("next_attempt", surrealdb::sql::Datetime::from(next_attempt)))
        .bind(("error", error))
        .await?;
        Ok(())
    }

    /// Terminal failure: the negative-acknowledge-without-requeue analog.
    /// Dead-lettered jobs are never claimed again, which is what prevents
    /// poison messages from looping.
    pub async fn mark_dead_letter(
        &self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($tb, $id) SET
                status = 'dead_letter',
                lease_until = NONE,
                next_attempt_at = NONE,
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

    async fn test_db() -> SurrealDbClient {
        SurrealDbClient::memory("ingestion_job_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    fn test_task(document_id: &str) -> IngestionTask {
        IngestionTask::new(
            document_id.to_string(),
            format!("{document_id}/original.pdf"),
            "file.pdf".to_string(),
            Some("application/pdf".to_string()),
            None,
        )
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_job() {
        let db = test_db().await;

        let mut first = test_task("doc-a");
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        let first_id = first.id.clone();
        first.enqueue(&db).await.expect("enqueue first");
        test_task("doc-b").enqueue(&db).await.expect("enqueue second");

        let claimed =
            IngestionTask::claim_next_ready(&db, "worker-1", Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job available");

        assert_eq!(claimed.id, first_id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert!(claimed.lease_until.is_some());
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_is_drained() {
        let db = test_db().await;
        let task = test_task("doc-a");
        task.enqueue(&db).await.expect("enqueue");

        let claimed =
            IngestionTask::claim_next_ready(&db, "w", Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job");
        claimed.mark_succeeded(&db).await.expect("succeed");

        let next = IngestionTask::claim_next_ready(&db, "w", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn scheduled_jobs_become_claimable_after_backoff() {
        let db = test_db().await;
        test_task("doc-a").enqueue(&db).await.expect("enqueue");

        let claimed =
            IngestionTask::claim_next_ready(&db, "w", Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job");

        claimed
            .mark_failed(
                TaskErrorInfo {
                    code: None,
                    message: "boom".into(),
                },
                Duration::from_secs(30),
                &db,
            )
            .await
            .expect("mark failed");

        // Not yet ready: backoff has not elapsed.
        let early = IngestionTask::claim_next_ready(&db, "w", Utc::now(), Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(early.is_none());

        // Ready once the clock passes next_attempt_at.
        let later = Utc::now() + chrono::Duration::seconds(31);
        let retried = IngestionTask::claim_next_ready(&db, "w", later, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("job ready after backoff");
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let db = test_db().await;
        test_task("doc-a").enqueue(&db).await.expect("enqueue");

        // Worker 1 claims with a zero-length lease and then disappears.
        let _claimed =
            IngestionTask::claim_next_ready(&db, "w1", Utc::now(), Duration::from_secs(0))
                .await
                .expect("claim")
                .expect("job");

        let later = Utc::now() + chrono::Duration::seconds(1);
        let reclaimed = IngestionTask::claim_next_ready(&db, "w2", later, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("reclaimed");
        assert_eq!(reclaimed.worker_id.as_deref(), Some("w2"));
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn dead_letter_jobs_stay_parked() {
        let db = test_db().await;
        test_task("doc-a").enqueue(&db).await.expect("enqueue");

        let claimed =
            IngestionTask::claim_next_ready(&db, "w", Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job");
        claimed
            .mark_dead_letter(
                TaskErrorInfo {
                    code: Some("VALIDATION_ERROR".into()),
                    message: "unsupported mime".into(),
                },
                &db,
            )
            .await
            .expect("dead letter");

        let far_future = Utc::now() + chrono::Duration::days(1);
        let next = IngestionTask::claim_next_ready(&db, "w", far_future, Duration::from_secs(60))
            .await
            .expect("claim");
        assert!(next.is_none(), "dead-lettered jobs must never loop");
    }
}
