#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod agent;
pub mod generator;
pub mod hybrid;
pub mod pipeline;
pub mod rerank;
pub mod sparse;

use std::sync::Arc;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::{ingestion_task::DEFAULT_LEASE_SECS, query_task::QueryTask},
    vector::Payload,
};
pub use pipeline::{DefaultQueryServices, QueryPipeline, QueryServices, RetrievalConfig};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// A retrieval candidate as it moves through fusion, reranking and
/// generation. `score` is whatever the producing stage assigned (cosine
/// similarity, BM25, fused RRF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
    pub rerank_position: Option<usize>,
}

impl RetrievedChunk {
    pub fn new(id: String, score: f32, payload: Payload) -> Self {
        Self {
            id,
            score,
            payload,
            rerank_position: None,
        }
    }
}

/// Single-consumer query pump, mirroring the ingestion worker: one claimed
/// job at a time per worker process.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    query_pipeline: Arc<QueryPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("query-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS);
    let idle_backoff = Duration::from_millis(250);

    info!(%worker_id, "query worker started");

    loop {
        match QueryTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(%worker_id, %task_id, query_id = %task.query_id, "claimed query task");
                if let Err(err) = query_pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "query task failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim query task");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
