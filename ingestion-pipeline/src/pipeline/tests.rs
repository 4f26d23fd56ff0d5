use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{layout, StorageManager},
        types::{
            document::{Document, DocumentStatus},
            ingestion_task::{IngestionTask, JobStatus},
        },
        vector::{ContentType, PayloadFilter, VectorPoint, VectorStore},
    },
    utils::tokenizer::Tokenizer,
};
use uuid::Uuid;

use super::{IngestionConfig, IngestionPipeline, PipelineServices};
use crate::{
    chunking::{Chunk, ChunkStrategy, ChunkingEngine, ChunkingOptions},
    convert::{ConvertedDocument, DocumentConverter},
    language::SizeCategory,
    pipeline::services::DocumentArtifacts,
    qa::{QaPair, QaType},
    summarize::{SummaryMethod, SummaryOutcome},
    tree::DocumentTree,
};

const DIMENSION: usize = 3;

/// Deterministic fake embedding so tests stay offline.
fn hashed_vector(text: &str) -> Vec<f32> {
    let mut acc = [0.1f32; DIMENSION];
    for (i, byte) in text.bytes().enumerate() {
        acc[i % DIMENSION] += f32::from(byte) / 255.0;
    }
    acc.to_vec()
}

struct FakeServices {
    storage: StorageManager,
    vector_store: VectorStore,
    chunking: ChunkingEngine,
    tokenizer: Tokenizer,
    fail_summary: bool,
}

impl FakeServices {
    fn new(db: Arc<SurrealDbClient>, storage: StorageManager, fail_summary: bool) -> Self {
        let tokenizer = Tokenizer::new("cl100k_base").expect("tokenizer");
        let chunking = ChunkingEngine::new(
            Arc::new(Tokenizer::new("cl100k_base").expect("tokenizer")),
            ChunkingOptions {
                chunk_size: 64,
                chunk_overlap: 8,
                min_chunk_size: 4,
                ..ChunkingOptions::default()
            },
        );
        Self {
            storage,
            vector_store: VectorStore::new(db),
            chunking,
            tokenizer,
            fail_summary,
        }
    }
}

#[async_trait]
impl PipelineServices for FakeServices {
    async fn fetch_original(&self, file_path: &str) -> Result<Bytes, AppError> {
        Ok(self.storage.get(file_path).await?)
    }

    async fn convert(&self, data: &[u8], mime_type: &str) -> Result<ConvertedDocument, AppError> {
        DocumentConverter::new(None, None, 1)
            .convert(data, mime_type)
            .await
    }

    async fn summarize(
        &self,
        _tree: &DocumentTree,
        _token_count: usize,
        _filename: &str,
        _mime_type: &str,
    ) -> Result<SummaryOutcome, AppError> {
        if self.fail_summary {
            return Err(AppError::Validation("summary backend rejected input".into()));
        }
        Ok(SummaryOutcome {
            text: "A concise summary of the fixture document.".into(),
            method: SummaryMethod::Single,
            sections_count: 0,
        })
    }

    async fn generate_qa(
        &self,
        _tree: &DocumentTree,
        _size: SizeCategory,
        _filename: &str,
        _mime_type: &str,
    ) -> Result<Vec<QaPair>, AppError> {
        Ok(vec![QaPair {
            question: "What does the fixture describe?".into(),
            answer: "A small document used in tests.".into(),
            qa_type: QaType::Overview,
        }])
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(inputs.iter().map(|t| hashed_vector(t)).collect())
    }

    fn chunk(&self, text: &str) -> Result<(ChunkStrategy, Vec<Chunk>), AppError> {
        self.chunking.chunk(text, "auto")
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    async fn persist_vectors(&self, points: Vec<VectorPoint>) -> Result<(), AppError> {
        self.vector_store.ensure_collection("documents", DIMENSION).await?;
        self.vector_store.upsert("documents", points).await
    }

    async fn store_artifacts(
        &self,
        document_id: &str,
        artifacts: DocumentArtifacts<'_>,
    ) -> Result<(), AppError> {
        self.storage
            .put(
                &layout::markdown(document_id),
                Bytes::from(artifacts.markdown.to_string()),
            )
            .await?;
        self.storage
            .put(
                &layout::summary(document_id),
                Bytes::from(artifacts.summary.to_string()),
            )
            .await?;
        Ok(())
    }
}

struct Harness {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    pipeline: IngestionPipeline,
}

async fn harness(fail_summary: bool) -> Harness {
    let db = Arc::new(
        SurrealDbClient::memory("ingestion_pipeline_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    let storage = StorageManager::memory();
    let services = Arc::new(FakeServices::new(
        Arc::clone(&db),
        storage.clone(),
        fail_summary,
    ));
    let pipeline = IngestionPipeline::with_services(
        Arc::clone(&db),
        IngestionConfig::default(),
        services,
        Duration::from_secs(30),
    );

    Harness {
        db,
        storage,
        pipeline,
    }
}

async fn seed_document(harness: &Harness, markdown: &str) -> (Document, IngestionTask) {
    let document = Document::new("fixture.md".into(), "text/markdown".into(), markdown.len() as u64);
    harness
        .db
        .store_item(document.clone())
        .await
        .expect("store document");

    let file_path = layout::original(&document.id, "md");
    harness
        .storage
        .put(&file_path, Bytes::from(markdown.to_string()))
        .await
        .expect("store original");

    let task = IngestionTask::new(
        document.id.clone(),
        file_path,
        "fixture.md".into(),
        Some("text/markdown".into()),
        None,
    );
    task.clone().enqueue(&harness.db).await.expect("enqueue");

    let claimed = IngestionTask::claim_next_ready(
        &harness.db,
        "test-worker",
        Utc::now(),
        Duration::from_secs(60),
    )
    .await
    .expect("claim")
    .expect("task ready");

    (document, claimed)
}

const FIXTURE: &str = "# Overview\n\nThe fixture document explains the system in a few words.\n\n\
## Details\n\nIt has two sections with enough text to produce several chunks when the window is small. \
The second section repeats itself a little to add body. The second section repeats itself a little to add body.";

#[tokio::test]
async fn successful_run_completes_document_and_stores_vectors() {
    let harness = harness(false).await;
    let (document, task) = seed_document(&harness, FIXTURE).await;

    harness
        .pipeline
        .process_task(task.clone())
        .await
        .expect("pipeline run");

    let stored: Document = harness
        .db
        .get_item(&document.id)
        .await
        .expect("get")
        .expect("document");
    assert_eq!(stored.status, DocumentStatus::Completed);
    assert!(stored.chunk_count > 0);
    assert_eq!(stored.qa_pairs_count, 1);
    // chunks + summary + question + answer
    assert_eq!(
        stored.vector_count,
        stored.chunk_count + 1 + stored.qa_pairs_count * 2
    );
    assert!(stored.summary.is_some());
    assert!(stored.processing_completed_at.is_some());
    assert_eq!(stored.chunking_strategy.as_deref(), Some("simple"));

    // Vectors landed under the document's id with the discriminant intact.
    let vector_store = VectorStore::new(Arc::clone(&harness.db));
    let (chunk_points, _) = vector_store
        .scroll(
            "documents",
            &PayloadFilter::new()
                .document_id(&document.id)
                .content_type(ContentType::Chunk),
            100,
            None,
        )
        .await
        .expect("scroll");
    assert_eq!(chunk_points.len() as u32, stored.chunk_count);

    // Artifacts are in place.
    assert!(harness
        .storage
        .exists(&layout::summary(&document.id))
        .await
        .expect("exists"));

    // The job is acknowledged.
    let job: IngestionTask = harness
        .db
        .get_item(&task.id)
        .await
        .expect("get job")
        .expect("job row");
    assert_eq!(job.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn stage_failure_marks_document_failed_and_dead_letters_the_job() {
    let harness = harness(true).await;
    let (document, task) = seed_document(&harness, FIXTURE).await;

    let result = harness.pipeline.process_task(task.clone()).await;
    assert!(result.is_err());

    let stored: Document = harness
        .db
        .get_item(&document.id)
        .await
        .expect("get")
        .expect("document");
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("summary backend rejected input"));

    // Validation errors are not retryable: the job must dead-letter, not
    // requeue.
    let job: IngestionTask = harness
        .db
        .get_item(&task.id)
        .await
        .expect("get job")
        .expect("job row");
    assert_eq!(job.status, JobStatus::DeadLetter);

    let next = IngestionTask::claim_next_ready(
        &harness.db,
        "test-worker",
        Utc::now() + chrono::Duration::days(1),
        Duration::from_secs(60),
    )
    .await
    .expect("claim");
    assert!(next.is_none());
}
