use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ingestion_task::JobStatus,
            query::{Query, QueryStatus},
            query_task::QueryTask,
        },
        vector::{ContentType, Payload},
    },
    utils::config::AppConfig,
};
use uuid::Uuid;

use super::{QueryPipeline, QueryServices, RetrievalConfig};
use crate::{
    agent::{AgentDecision, AgentEvaluation, MAX_ITERATIONS_REASONING},
    generator::{extract_citations, GeneratedAnswer},
    hybrid::SearchProvenance,
    RetrievedChunk,
};

#[derive(Clone, Copy)]
enum EvaluatorMode {
    ProceedImmediately,
    AlwaysRefine,
    AlwaysExpand,
}

struct FakeQueryServices {
    mode: EvaluatorMode,
    fail_generation: bool,
    search_calls: AtomicUsize,
    last_top_k: AtomicUsize,
}

impl FakeQueryServices {
    fn new(mode: EvaluatorMode) -> Self {
        Self {
            mode,
            fail_generation: false,
            search_calls: AtomicUsize::new(0),
            last_top_k: AtomicUsize::new(0),
        }
    }

    fn failing_generation() -> Self {
        Self {
            fail_generation: true,
            ..Self::new(EvaluatorMode::ProceedImmediately)
        }
    }

    fn candidates() -> Vec<RetrievedChunk> {
        (0..4)
            .map(|i| {
                let mut payload = Payload::new(
                    "doc-1",
                    ContentType::Chunk,
                    format!("candidate text number {i}"),
                );
                payload.chunk_index = Some(i);
                payload.section = Some("Fixture".into());
                RetrievedChunk::new(format!("c{i}"), 0.9 - i as f32 * 0.1, payload)
            })
            .collect()
    }
}

#[async_trait]
impl QueryServices for FakeQueryServices {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, AppError> {
        Ok(vec![0.1, 0.2, 0.3])
    }

    async fn hybrid_search(
        &self,
        _query_embedding: Vec<f32>,
        _query_text: &str,
        top_k: usize,
        _document_filter: Option<&[String]>,
    ) -> Result<(Vec<RetrievedChunk>, SearchProvenance), AppError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.last_top_k.store(top_k, Ordering::SeqCst);
        let candidates = Self::candidates();
        let provenance = SearchProvenance {
            vector_chunks: candidates.len(),
            vector_summaries: 1,
            vector_qa: 0,
            keyword_bm25: 2,
            after_merge: candidates.len(),
        };
        Ok((candidates, provenance))
    }

    async fn rerank(
        &self,
        _query: &str,
        chunks: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        Ok(chunks
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, mut chunk)| {
                chunk.rerank_position = Some(i + 1);
                chunk
            })
            .collect())
    }

    async fn evaluate(
        &self,
        _query: &str,
        _chunks: &[RetrievedChunk],
        _iteration: usize,
        _max_iterations: usize,
    ) -> AgentEvaluation {
        match self.mode {
            EvaluatorMode::ProceedImmediately => {
                AgentEvaluation::proceed(0.9, "sufficient coverage")
            }
            EvaluatorMode::AlwaysRefine => AgentEvaluation {
                decision: AgentDecision::RefineQuery,
                confidence: 0.3,
                reasoning: "needs a better query".into(),
                refined_query: Some("x".into()),
            },
            EvaluatorMode::AlwaysExpand => AgentEvaluation {
                decision: AgentDecision::ExpandSearch,
                confidence: 0.5,
                reasoning: "partially relevant".into(),
                refined_query: None,
            },
        }
    }

    async fn generate(
        &self,
        _query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, AppError> {
        if self.fail_generation {
            return Err(AppError::ExternalService {
                service: "llm".into(),
                status: Some(500),
                message: "generation backend down".into(),
            });
        }
        let answer = "Yes [1] and partly [3].".to_string();
        let citations = extract_citations(&answer, chunks);
        Ok(GeneratedAnswer { answer, citations })
    }
}

struct Harness {
    db: Arc<SurrealDbClient>,
    pipeline: QueryPipeline,
    services: Arc<FakeQueryServices>,
}

async fn harness(services: FakeQueryServices, max_iterations: usize) -> Harness {
    let db = Arc::new(
        SurrealDbClient::memory("query_pipeline_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );

    let mut app_config = AppConfig::default();
    app_config.max_agent_iterations = max_iterations;
    let config = RetrievalConfig::from_config(&app_config);

    let services = Arc::new(services);
    let pipeline = QueryPipeline::new(
        Arc::clone(&db),
        Arc::clone(&services) as Arc<dyn QueryServices>,
        config,
    );

    Harness {
        db,
        pipeline,
        services,
    }
}

async fn seed_query(harness: &Harness) -> (Query, QueryTask) {
    let query = Query::new("does the warranty cover water damage?".into(), None, true);
    harness
        .db
        .store_item(query.clone())
        .await
        .expect("store query");

    let task = QueryTask::new(
        query.id.clone(),
        query.query_text.clone(),
        None,
        true,
        None,
        None,
        None,
    );
    task.clone().enqueue(&harness.db).await.expect("enqueue");

    let claimed = QueryTask::claim_next_ready(
        &harness.db,
        "test-worker",
        Utc::now(),
        Duration::from_secs(60),
    )
    .await
    .expect("claim")
    .expect("task ready");

    (query, claimed)
}

#[tokio::test]
async fn proceed_on_first_iteration_completes_with_citations() {
    let harness = harness(FakeQueryServices::new(EvaluatorMode::ProceedImmediately), 3).await;
    let (query, task) = seed_query(&harness).await;

    harness.pipeline.process_task(task).await.expect("run");

    let stored: Query = harness
        .db
        .get_item(&query.id)
        .await
        .expect("get")
        .expect("query row");
    assert_eq!(stored.status, QueryStatus::Completed);
    assert_eq!(stored.answer.as_deref(), Some("Yes [1] and partly [3]."));
    assert_eq!(stored.citations.len(), 2);
    assert_eq!(stored.citations[0].index, 1);
    assert_eq!(stored.citations[1].index, 3);
    assert!(stored.latency_ms.is_some());

    // One iteration only, ending in proceed.
    let debug = stored.debug_data.expect("debug data");
    let iterations = debug["iterations"].as_array().expect("iterations");
    assert_eq!(iterations.len(), 1);
    assert_eq!(iterations[0]["agent_evaluation"]["decision"], "proceed");
    assert_eq!(iterations[0]["search_sources"]["vector_chunks"], 4);
    assert_eq!(harness.services.search_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refine_loop_is_forced_to_proceed_at_the_cap() {
    let harness = harness(FakeQueryServices::new(EvaluatorMode::AlwaysRefine), 2).await;
    let (query, task) = seed_query(&harness).await;

    harness.pipeline.process_task(task).await.expect("run");

    let stored: Query = harness
        .db
        .get_item(&query.id)
        .await
        .expect("get")
        .expect("query row");
    assert_eq!(stored.status, QueryStatus::Completed);

    let debug = stored.debug_data.expect("debug data");
    let iterations = debug["iterations"].as_array().expect("iterations");
    assert_eq!(iterations.len(), 2, "loop must run exactly max_iterations");

    assert_eq!(
        iterations[0]["agent_evaluation"]["decision"],
        "refine_query"
    );
    // The refined query is used on the second pass.
    assert_eq!(iterations[1]["query_used"], "x");
    // The final iteration's recorded decision is the forced proceed.
    assert_eq!(iterations[1]["agent_evaluation"]["decision"], "proceed");
    assert_eq!(
        iterations[1]["agent_evaluation"]["reasoning"],
        MAX_ITERATIONS_REASONING
    );

    // The answer is generated from the final iteration's reranked set.
    assert_eq!(stored.citations.len(), 2);
    assert_eq!(harness.services.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expand_widens_top_k_on_the_next_iteration() {
    let harness = harness(FakeQueryServices::new(EvaluatorMode::AlwaysExpand), 2).await;
    let (_, task) = seed_query(&harness).await;

    harness.pipeline.process_task(task).await.expect("run");

    // Default top_k 20 plus one expand step of 10.
    assert_eq!(harness.services.last_top_k.load(Ordering::SeqCst), 30);
    assert_eq!(harness.services.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn citation_indices_always_reference_the_final_set() {
    let harness = harness(FakeQueryServices::new(EvaluatorMode::AlwaysRefine), 3).await;
    let (query, task) = seed_query(&harness).await;

    harness.pipeline.process_task(task).await.expect("run");

    let stored: Query = harness
        .db
        .get_item(&query.id)
        .await
        .expect("get")
        .expect("query row");

    let debug = stored.debug_data.expect("debug data");
    let final_iteration = debug["iterations"]
        .as_array()
        .expect("iterations")
        .last()
        .cloned()
        .expect("last iteration");
    let final_ids: Vec<String> = final_iteration["chunks_after_rerank"]
        .as_array()
        .expect("chunks")
        .iter()
        .map(|c| c["id"].as_str().expect("id").to_string())
        .collect();

    for citation in &stored.citations {
        assert!(
            final_ids.contains(&citation.chunk_id),
            "citation {} must come from the final reranked set",
            citation.chunk_id
        );
    }
}

#[tokio::test]
async fn generation_failure_marks_the_query_failed() {
    let harness = harness(FakeQueryServices::failing_generation(), 3).await;
    let (query, task) = seed_query(&harness).await;

    let result = harness.pipeline.process_task(task.clone()).await;
    assert!(result.is_err());

    let stored: Query = harness
        .db
        .get_item(&query.id)
        .await
        .expect("get")
        .expect("query row");
    assert_eq!(stored.status, QueryStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("generation backend down"));

    let job: QueryTask = harness
        .db
        .get_item(&task.id)
        .await
        .expect("get job")
        .expect("job row");
    assert_eq!(job.status, JobStatus::DeadLetter);
}
