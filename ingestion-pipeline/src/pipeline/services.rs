use std::sync::Arc;
use std::time::Duration;

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{layout, StorageManager},
        vector::{VectorPoint, VectorStore},
    },
    utils::{config::AppConfig, embedding::Embedder, tokenizer::Tokenizer},
};
use serde_json::json;

use super::config::IngestionConfig;
use crate::{
    chunking::{Chunk, ChunkStrategy, ChunkingEngine, ChunkingOptions},
    convert::{
        provider::{DocumentAnalysisProvider, VisionProvider},
        ConvertedDocument, DocumentConverter,
    },
    language::SizeCategory,
    qa::{QaGenerator, QaPair},
    summarize::{Summarizer, SummarizerConfig, SummaryOutcome},
    tree::DocumentTree,
};

/// Derived artifacts written to the object store when a document completes.
pub struct DocumentArtifacts<'a> {
    pub markdown: &'a str,
    pub metadata: serde_json::Value,
    pub summary: &'a str,
    pub qa_pairs: &'a [QaPair],
}

/// Every external effect of the ingestion pipeline. Stages only talk to this
/// trait; tests swap in fakes.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_original(&self, file_path: &str) -> Result<Bytes, AppError>;

    async fn convert(&self, data: &[u8], mime_type: &str) -> Result<ConvertedDocument, AppError>;

    async fn summarize(
        &self,
        tree: &DocumentTree,
        token_count: usize,
        filename: &str,
        mime_type: &str,
    ) -> Result<SummaryOutcome, AppError>;

    async fn generate_qa(
        &self,
        tree: &DocumentTree,
        size: SizeCategory,
        filename: &str,
        mime_type: &str,
    ) -> Result<Vec<QaPair>, AppError>;

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    fn chunk(&self, text: &str) -> Result<(ChunkStrategy, Vec<Chunk>), AppError>;

    fn count_tokens(&self, text: &str) -> usize;

    async fn persist_vectors(&self, points: Vec<VectorPoint>) -> Result<(), AppError>;

    async fn store_artifacts(
        &self,
        document_id: &str,
        artifacts: DocumentArtifacts<'_>,
    ) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    storage: StorageManager,
    converter: DocumentConverter,
    summarizer: Summarizer,
    qa_generator: QaGenerator,
    embedder: Embedder,
    vector_store: VectorStore,
    chunking: ChunkingEngine,
    strategy: String,
    tokenizer: Arc<Tokenizer>,
    collection: String,
    embedding_size: u32,
    upsert_batch: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Client<OpenAIConfig>,
        config: &AppConfig,
        pipeline_config: &IngestionConfig,
        storage: StorageManager,
        analysis_provider: Option<Arc<dyn DocumentAnalysisProvider>>,
        vision_provider: Option<Arc<dyn VisionProvider>>,
    ) -> Result<Self, AppError> {
        let tokenizer = Arc::new(Tokenizer::new(&config.tokenizer_encoding)?);

        let converter = DocumentConverter::new(
            analysis_provider,
            vision_provider,
            config.max_concurrent_image_processing,
        );
        let summarizer = Summarizer::new(
            openai_client.clone(),
            &config.chat_model,
            SummarizerConfig::from_config(config),
        );
        let qa_generator = QaGenerator::new(
            openai_client.clone(),
            &config.chat_model,
            Duration::from_secs(config.llm_timeout_secs),
        );
        let embedder = Embedder::new(
            openai_client,
            &config.embedding_model,
            config.embedding_size,
            config.embedding_batch_size,
            Duration::from_secs(config.embedding_timeout_secs),
        );
        let chunking = ChunkingEngine::new(
            Arc::clone(&tokenizer),
            ChunkingOptions::from_config(config),
        );

        Ok(Self {
            storage,
            converter,
            summarizer,
            qa_generator,
            embedder,
            vector_store: VectorStore::new(db),
            chunking,
            strategy: config.chunking_strategy.clone(),
            tokenizer,
            collection: config.vector_collection.clone(),
            embedding_size: config.embedding_size,
            upsert_batch: pipeline_config.tuning.vector_upsert_batch,
        })
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_original(&self, file_path: &str) -> Result<Bytes, AppError> {
        Ok(self.storage.get(file_path).await?)
    }

    async fn convert(&self, data: &[u8], mime_type: &str) -> Result<ConvertedDocument, AppError> {
        self.converter.convert(data, mime_type).await
    }

    async fn summarize(
        &self,
        tree: &DocumentTree,
        token_count: usize,
        filename: &str,
        mime_type: &str,
    ) -> Result<SummaryOutcome, AppError> {
        self.summarizer
            .summarize(tree, token_count, filename, mime_type)
            .await
    }

    async fn generate_qa(
        &self,
        tree: &DocumentTree,
        size: SizeCategory,
        filename: &str,
        mime_type: &str,
    ) -> Result<Vec<QaPair>, AppError> {
        self.qa_generator
            .generate(tree, size, filename, mime_type)
            .await
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.embedder.embed_batch(inputs).await
    }

    fn chunk(&self, text: &str) -> Result<(ChunkStrategy, Vec<Chunk>), AppError> {
        self.chunking.chunk(text, &self.strategy)
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    async fn persist_vectors(&self, points: Vec<VectorPoint>) -> Result<(), AppError> {
        self.vector_store
            .ensure_collection(&self.collection, self.embedding_size as usize)
            .await?;

        for batch in points.chunks(self.upsert_batch.max(1)) {
            self.vector_store
                .upsert(&self.collection, batch.to_vec())
                .await?;
        }

        Ok(())
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
                &layout::metadata(document_id),
                Bytes::from(serde_json::to_vec_pretty(&artifacts.metadata).map_err(|e| {
                    AppError::InternalError(format!("metadata serialization failed: {e}"))
                })?),
            )
            .await?;
        self.storage
            .put(
                &layout::summary(document_id),
                Bytes::from(artifacts.summary.to_string()),
            )
            .await?;
        self.storage
            .put(
                &layout::qa_pairs(document_id),
                Bytes::from(
                    serde_json::to_vec_pretty(&json!({ "qa_pairs": artifacts.qa_pairs }))
                        .map_err(|e| {
                            AppError::InternalError(format!(
                                "qa pairs serialization failed: {e}"
                            ))
                        })?,
                ),
            )
            .await?;

        Ok(())
    }
}
