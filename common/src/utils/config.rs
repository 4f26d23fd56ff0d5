use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Application configuration, loaded from an optional `config` file plus the
/// environment. Every tunable carries a serde default so a minimal deployment
/// only needs connection settings.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    // Models
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_size")]
    pub embedding_size: u32,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    // Vector storage
    #[serde(default = "default_vector_collection")]
    pub vector_collection: String,

    // Chunking
    #[serde(default = "default_chunking_strategy")]
    pub chunking_strategy: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_parent_chunk_multiplier")]
    pub parent_chunk_multiplier: f32,
    #[serde(default = "default_parent_summary_max_length")]
    pub parent_summary_max_length: usize,
    #[serde(default = "default_true")]
    pub semantic_overlap_enabled: bool,
    #[serde(default = "default_semantic_overlap_tokens")]
    pub semantic_overlap_tokens: usize,
    #[serde(default = "default_hierarchical_threshold_chars")]
    pub hierarchical_threshold_chars: usize,
    #[serde(default = "default_semantic_threshold_chars")]
    pub semantic_threshold_chars: usize,
    #[serde(default = "default_min_headers_for_semantic")]
    pub min_headers_for_semantic: usize,
    #[serde(default = "default_encoding_name")]
    pub tokenizer_encoding: String,

    // Retrieval
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_rerank_top")]
    pub default_rerank_top: usize,
    #[serde(default = "default_max_agent_iterations")]
    pub max_agent_iterations: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    #[serde(default = "default_true")]
    pub enable_qa_matching: bool,
    #[serde(default = "default_bm25_max_corpus")]
    pub bm25_max_corpus: usize,
    #[serde(default = "default_expand_top_k_step")]
    pub expand_top_k_step: usize,

    // Summarizer
    #[serde(default = "default_summarizer_short_doc_threshold")]
    pub summarizer_short_doc_threshold: usize,
    #[serde(default = "default_summarizer_min_section_size")]
    pub summarizer_min_section_size: usize,
    #[serde(default = "default_summarizer_max_section_size")]
    pub summarizer_max_section_size: usize,
    #[serde(default = "default_summarizer_max_concurrent")]
    pub summarizer_max_concurrent: usize,
    #[serde(default = "default_summarizer_section_max_tokens")]
    pub summarizer_section_max_tokens: u32,
    #[serde(default = "default_summarizer_final_max_tokens")]
    pub summarizer_final_max_tokens: u32,

    // Vision
    #[serde(default = "default_max_concurrent_image_processing")]
    pub max_concurrent_image_processing: usize,

    // Timeouts (seconds)
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,

    // Rate limiting
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_embedding_size() -> u32 {
    3072
}

fn default_embedding_batch_size() -> usize {
    20
}

fn default_vector_collection() -> String {
    "documents".to_string()
}

fn default_chunking_strategy() -> String {
    "auto".to_string()
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_min_chunk_size() -> usize {
    100
}

fn default_max_chunk_size() -> usize {
    1000
}

fn default_parent_chunk_multiplier() -> f32 {
    2.0
}

fn default_parent_summary_max_length() -> usize {
    300
}

fn default_semantic_overlap_tokens() -> usize {
    50
}

fn default_hierarchical_threshold_chars() -> usize {
    60_000
}

fn default_semantic_threshold_chars() -> usize {
    12_000
}

fn default_min_headers_for_semantic() -> usize {
    3
}

fn default_encoding_name() -> String {
    "cl100k_base".to_string()
}

fn default_top_k() -> usize {
    20
}

fn default_rerank_top() -> usize {
    5
}

fn default_max_agent_iterations() -> usize {
    3
}

fn default_rrf_k() -> u32 {
    60
}

fn default_bm25_max_corpus() -> usize {
    1000
}

fn default_expand_top_k_step() -> usize {
    10
}

fn default_summarizer_short_doc_threshold() -> usize {
    3000
}

fn default_summarizer_min_section_size() -> usize {
    100
}

fn default_summarizer_max_section_size() -> usize {
    8000
}

fn default_summarizer_max_concurrent() -> usize {
    5
}

fn default_summarizer_section_max_tokens() -> u32 {
    200
}

fn default_summarizer_final_max_tokens() -> u32 {
    600
}

fn default_max_concurrent_image_processing() -> usize {
    3
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_embedding_timeout_secs() -> u64 {
    60
}

fn default_conversion_timeout_secs() -> u64 {
    300
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "rag".to_string(),
            surrealdb_database: "rag".to_string(),
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            vector_collection: default_vector_collection(),
            chunking_strategy: default_chunking_strategy(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_size: default_embedding_size(),
            embedding_batch_size: default_embedding_batch_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            parent_chunk_multiplier: default_parent_chunk_multiplier(),
            parent_summary_max_length: default_parent_summary_max_length(),
            semantic_overlap_enabled: true,
            semantic_overlap_tokens: default_semantic_overlap_tokens(),
            hierarchical_threshold_chars: default_hierarchical_threshold_chars(),
            semantic_threshold_chars: default_semantic_threshold_chars(),
            min_headers_for_semantic: default_min_headers_for_semantic(),
            tokenizer_encoding: default_encoding_name(),
            default_top_k: default_top_k(),
            default_rerank_top: default_rerank_top(),
            max_agent_iterations: default_max_agent_iterations(),
            rrf_k: default_rrf_k(),
            enable_hybrid_search: true,
            enable_qa_matching: true,
            bm25_max_corpus: default_bm25_max_corpus(),
            expand_top_k_step: default_expand_top_k_step(),
            summarizer_short_doc_threshold: default_summarizer_short_doc_threshold(),
            summarizer_min_section_size: default_summarizer_min_section_size(),
            summarizer_max_section_size: default_summarizer_max_section_size(),
            summarizer_max_concurrent: default_summarizer_max_concurrent(),
            summarizer_section_max_tokens: default_summarizer_section_max_tokens(),
            summarizer_final_max_tokens: default_summarizer_final_max_tokens(),
            max_concurrent_image_processing: default_max_concurrent_image_processing(),
            llm_timeout_secs: default_llm_timeout_secs(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}
