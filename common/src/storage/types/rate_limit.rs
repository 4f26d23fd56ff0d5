use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(RateLimit, "rate_limit", {
    key: String,
    window_start: i64,
    request_count: u32
});

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

impl RateLimit {
    /// Admits or rejects one request in a fixed window, serialized through a
    /// conditional upsert on `(key, window_start)`. All callers hitting the
    /// same window increment the same row, so the counter is authoritative
    /// across processes.
    pub async fn check_and_increment(
        db: &SurrealDbClient,
        key: &str,
        now_unix: i64,
        window_secs: u64,
        max_requests: u32,
    ) -> Result<RateLimitDecision, AppError> {
        let window = i64::try_from(window_secs).unwrap_or(60);
        let window_start = (now_unix / window) * window;
        let record_id = format!("{key}|{window_start}");

        let sql = "
            UPSERT type::thing('rate_limit', $rid) SET
                key = $key,
                window_start = $window_start,
                request_count = IF request_count != NONE THEN request_count + 1 ELSE 1 END,
                created_at = IF created_at != NONE THEN created_at ELSE time::now() END,
                updated_at = time::now()
            RETURN AFTER;
        ";

        let mut response = db
            .query(sql)
            .bind(("rid", record_id))
            .bind(("key", key.to_string()))
            .bind(("window_start", window_start))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        let current = rows
            .into_iter()
            .next()
            .ok_or_else(|| AppError::InternalError("rate limit upsert returned nothing".into()))?;

        let reset_after_secs =
            u64::try_from((window_start + window) - now_unix).unwrap_or(window_secs);

        Ok(RateLimitDecision {
            allowed: current.request_count <= max_requests,
            remaining: max_requests.saturating_sub(current.request_count),
            reset_after_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn requests_within_limit_are_admitted() {
        let db = SurrealDbClient::memory("rate_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        for i in 0..3 {
            let decision = RateLimit::check_and_increment(&db, "ip:1.2.3.4", 1000, 60, 3)
                .await
                .expect("check");
            assert!(decision.allowed, "request {i} should pass");
        }

        let rejected = RateLimit::check_and_increment(&db, "ip:1.2.3.4", 1000, 60, 3)
            .await
            .expect("check");
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.reset_after_secs <= 60);
    }

    #[tokio::test]
    async fn windows_and_keys_are_independent() {
        let db = SurrealDbClient::memory("rate_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");

        let exhausted = RateLimit::check_and_increment(&db, "ip:a", 30, 60, 1)
            .await
            .expect("check");
        assert!(exhausted.allowed);
        assert!(
            !RateLimit::check_and_increment(&db, "ip:a", 31, 60, 1)
                .await
                .expect("check")
                .allowed
        );

        // A different key in the same window is unaffected.
        assert!(
            RateLimit::check_and_increment(&db, "ip:b", 31, 60, 1)
                .await
                .expect("check")
                .allowed
        );

        // The same key in the next window starts fresh.
        assert!(
            RateLimit::check_and_increment(&db, "ip:a", 61, 60, 1)
                .await
                .expect("check")
                .allowed
        );
    }
}
