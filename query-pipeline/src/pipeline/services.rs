use std::sync::Arc;
use std::time::Duration;

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, vector::VectorStore},
    utils::{config::AppConfig, embedding::Embedder},
};

use crate::{
    agent::{AgentEvaluation, AgentEvaluator},
    generator::{AnswerGenerator, GeneratedAnswer},
    hybrid::{hybrid_search, HybridSearchConfig, SearchProvenance},
    rerank::Reranker,
    RetrievedChunk,
};

/// External effects of the query loop, one method per stage. Tests inject
/// fakes; the pipeline itself owns only control flow.
#[async_trait]
pub trait QueryServices: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError>;

    async fn hybrid_search(
        &self,
        query_embedding: Vec<f32>,
        query_text: &str,
        top_k: usize,
        document_filter: Option<&[String]>,
    ) -> Result<(Vec<RetrievedChunk>, SearchProvenance), AppError>;

    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError>;

    async fn evaluate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        iteration: usize,
        max_iterations: usize,
    ) -> AgentEvaluation;

    async fn generate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, AppError>;
}

pub struct DefaultQueryServices {
    embedder: Embedder,
    vector_store: VectorStore,
    reranker: Reranker,
    evaluator: AgentEvaluator,
    generator: AnswerGenerator,
    collection: String,
    hybrid_config: HybridSearchConfig,
}

impl DefaultQueryServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Client<OpenAIConfig>,
        config: &AppConfig,
    ) -> Self {
        let llm_timeout = Duration::from_secs(config.llm_timeout_secs);

        Self {
            embedder: Embedder::new(
                openai_client.clone(),
                &config.embedding_model,
                config.embedding_size,
                config.embedding_batch_size,
                Duration::from_secs(config.embedding_timeout_secs),
            ),
            vector_store: VectorStore::new(db),
            reranker: Reranker::new(openai_client.clone(), &config.chat_model, llm_timeout),
            evaluator: AgentEvaluator::new(openai_client.clone(), &config.chat_model, llm_timeout),
            generator: AnswerGenerator::new(openai_client, &config.chat_model, llm_timeout),
            collection: config.vector_collection.clone(),
            hybrid_config: HybridSearchConfig {
                rrf_k: config.rrf_k,
                enable_hybrid: config.enable_hybrid_search,
                enable_qa_matching: config.enable_qa_matching,
                bm25_max_corpus: config.bm25_max_corpus,
            },
        }
    }
}

#[async_trait]
impl QueryServices for DefaultQueryServices {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embedder.embed(text).await
    }

    async fn hybrid_search(
        &self,
        query_embedding: Vec<f32>,
        query_text: &str,
        top_k: usize,
        document_filter: Option<&[String]>,
    ) -> Result<(Vec<RetrievedChunk>, SearchProvenance), AppError> {
        hybrid_search(
            &self.vector_store,
            &self.collection,
            query_embedding,
            query_text,
            top_k,
            document_filter,
            &self.hybrid_config,
        )
        .await
    }

    async fn rerank(
        &self,
        query: &str,
        chunks: Vec<RetrievedChunk>,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AppError> {
        Ok(self.reranker.rerank(query, chunks, top_k).await)
    }

    async fn evaluate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        iteration: usize,
        max_iterations: usize,
    ) -> AgentEvaluation {
        self.evaluator
            .evaluate(query, chunks, iteration, max_iterations)
            .await
    }

    async fn generate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<GeneratedAnswer, AppError> {
        self.generator.generate(query, chunks).await
    }
}
