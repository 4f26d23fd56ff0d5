mod config;
mod services;

pub use config::RetrievalConfig;
pub use services::{DefaultQueryServices, QueryServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ingestion_task::TaskErrorInfo,
            query::{Citation, Query},
            query_task::QueryTask,
        },
    },
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    agent::{apply_hard_rules, AgentDecision, AgentEvaluation},
    hybrid::SearchProvenance,
    RetrievedChunk,
};

const SNAPSHOT_PREVIEW_CHARS: usize = 200;

/// Compact view of a candidate captured in the per-iteration debug record.
#[derive(Debug, Clone, Serialize)]
struct ChunkSnapshot {
    id: String,
    score: f32,
    text: String,
    section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rerank_position: Option<usize>,
}

impl ChunkSnapshot {
    fn from_chunk(chunk: &RetrievedChunk) -> Self {
        Self {
            id: chunk.id.clone(),
            score: chunk.score,
            text: chunk.payload.text.chars().take(SNAPSHOT_PREVIEW_CHARS).collect(),
            section: chunk.payload.section.clone(),
            rerank_position: chunk.rerank_position,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
struct IterationTiming {
    embedding_ms: u64,
    search_ms: u64,
    rerank_ms: u64,
    agent_ms: u64,
    total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
struct IterationRecord {
    iteration_number: usize,
    query_used: String,
    search_sources: SearchProvenance,
    chunks_before_rerank: Vec<ChunkSnapshot>,
    chunks_after_rerank: Vec<ChunkSnapshot>,
    agent_evaluation: AgentEvaluation,
    timing: IterationTiming,
}

struct LoopOutput {
    final_chunks: Vec<RetrievedChunk>,
    iterations: Vec<IterationRecord>,
}

/// The agentic query loop (embed → hybrid search → rerank → evaluate →
/// proceed/refine/expand), bounded by `max_iterations`, followed by cited
/// answer generation.
pub struct QueryPipeline {
    db: Arc<SurrealDbClient>,
    services: Arc<dyn QueryServices>,
    config: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        services: Arc<dyn QueryServices>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            db,
            services,
            config,
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(task_id = %task.id, query_id = %task.query_id, attempt = task.attempts)
    )]
    pub async fn process_task(&self, task: QueryTask) -> Result<(), AppError> {
        Query::mark_processing(&task.query_id, &self.db).await?;
        let started = Instant::now();

        match self.run(&task).await {
            Ok((answer, citations, debug_data)) => {
                let latency_ms = duration_millis(started.elapsed());
                Query::complete(
                    &task.query_id,
                    answer,
                    citations,
                    Some(debug_data),
                    latency_ms,
                    &self.db,
                )
                .await?;
                task.mark_succeeded(&self.db).await?;
                info!(
                    query_id = %task.query_id,
                    latency_ms,
                    "query completed"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                Query::mark_failed(&task.query_id, reason.clone(), &self.db).await?;
                task.mark_dead_letter(
                    TaskErrorInfo {
                        code: Some(err.error_code().to_string()),
                        message: reason.clone(),
                    },
                    &self.db,
                )
                .await?;
                warn!(query_id = %task.query_id, error = %reason, "query failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        task: &QueryTask,
    ) -> Result<(String, Vec<Citation>, serde_json::Value), AppError> {
        let config = self
            .config
            .clone()
            .with_overrides(task.top_k, task.rerank_top);

        let output = self.run_agentic_loop(task, &config).await?;

        let generate_start = Instant::now();
        let generated = self
            .services
            .generate(&task.query_text, &output.final_chunks)
            .await?;
        let generation_ms = duration_millis(generate_start.elapsed());

        let debug_data = build_debug_data(&output.iterations, generation_ms);

        Ok((generated.answer, generated.citations, debug_data))
    }

    async fn run_agentic_loop(
        &self,
        task: &QueryTask,
        config: &RetrievalConfig,
    ) -> Result<LoopOutput, AppError> {
        let document_filter = task.document_filter.as_deref();
        let mut current_query = task.query_text.clone();
        let mut top_k = config.top_k;
        let mut final_chunks: Vec<RetrievedChunk> = Vec::new();
        let mut iterations: Vec<IterationRecord> = Vec::new();

        for iteration in 1..=config.max_iterations {
            let iteration_start = Instant::now();
            let mut timing = IterationTiming::default();

            let stage_start = Instant::now();
            let query_embedding = self.services.embed_query(&current_query).await?;
            timing.embedding_ms = duration_millis(stage_start.elapsed());

            let stage_start = Instant::now();
            let (candidates, provenance) = self
                .services
                .hybrid_search(query_embedding, &current_query, top_k, document_filter)
                .await?;
            timing.search_ms = duration_millis(stage_start.elapsed());

            let before_rerank: Vec<ChunkSnapshot> = candidates
                .iter()
                .take(config.rerank_top)
                .map(ChunkSnapshot::from_chunk)
                .collect();

            let stage_start = Instant::now();
            let reranked = self
                .services
                .rerank(&current_query, candidates, config.rerank_top)
                .await?;
            timing.rerank_ms = duration_millis(stage_start.elapsed());

            let stage_start = Instant::now();
            let evaluation = self
                .services
                .evaluate(&current_query, &reranked, iteration, config.max_iterations)
                .await;
            // The cap and the empty-refinement rules hold no matter what the
            // evaluator implementation returned.
            let evaluation = apply_hard_rules(evaluation, iteration, config.max_iterations);
            timing.agent_ms = duration_millis(stage_start.elapsed());
            timing.total_ms = duration_millis(iteration_start.elapsed());

            iterations.push(IterationRecord {
                iteration_number: iteration,
                query_used: current_query.clone(),
                search_sources: provenance,
                chunks_before_rerank: before_rerank,
                chunks_after_rerank: reranked.iter().map(ChunkSnapshot::from_chunk).collect(),
                agent_evaluation: evaluation.clone(),
                timing,
            });

            info!(
                iteration,
                max_iterations = config.max_iterations,
                decision = ?evaluation.decision,
                candidates = reranked.len(),
                "agentic iteration finished"
            );

            match evaluation.decision {
                AgentDecision::Proceed => {
                    final_chunks = reranked;
                    break;
                }
                AgentDecision::RefineQuery => {
                    // Hard rules guarantee a non-empty refinement here.
                    final_chunks = reranked;
                    if let Some(refined) = evaluation.refined_query {
                        current_query = refined;
                    }
                }
                AgentDecision::ExpandSearch => {
                    final_chunks = reranked;
                    top_k += config.expand_top_k_step;
                }
            }
        }

        Ok(LoopOutput {
            final_chunks,
            iterations,
        })
    }
}

fn build_debug_data(iterations: &[IterationRecord], generation_ms: u64) -> serde_json::Value {
    let sum = |f: fn(&IterationTiming) -> u64| iterations.iter().map(|i| f(&i.timing)).sum::<u64>();
    let loop_total = sum(|t| t.total_ms);

    serde_json::json!({
        "iterations": iterations,
        "timing": {
            "embedding_ms": sum(|t| t.embedding_ms),
            "search_ms": sum(|t| t.search_ms),
            "rerank_ms": sum(|t| t.rerank_ms),
            "agent_ms": sum(|t| t.agent_ms),
            "generation_ms": generation_ms,
            "total_ms": loop_total + generation_ms,
        }
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
