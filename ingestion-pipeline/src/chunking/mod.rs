pub mod hierarchical;
pub mod markdown_parser;
pub mod semantic;
pub mod simple;

use std::sync::Arc;
use std::time::Instant;

use common::{error::AppError, utils::config::AppConfig, utils::tokenizer::Tokenizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Position of a chunk in the parent/child scheme. Simple and semantic
/// chunkers only emit `Standalone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Standalone,
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Simple,
    Semantic,
    Hierarchical,
}

impl ChunkStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Semantic => "semantic",
            Self::Hierarchical => "hierarchical",
        }
    }
}

/// A retrievable unit of text plus everything retrieval needs to present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Dense per-document index, assigned strictly in document order.
    pub chunk_index: usize,
    pub token_count: usize,
    pub hierarchy_path: Option<String>,
    pub section_title: Option<String>,
    pub strategy: ChunkStrategy,
    pub chunk_type: ChunkType,
    /// `chunk_index` of the owning parent; set exactly on `Child` chunks.
    pub parent_index: Option<usize>,
    /// Snapshot of the parent's text at chunking time.
    pub parent_summary: Option<String>,
    pub has_overlap: bool,
    pub overlap_tokens: usize,
    /// Token window `[start, end)` in the chunked source, when the strategy
    /// works on exact token offsets.
    pub token_window: Option<(usize, usize)>,
}

impl Chunk {
    pub fn new(text: String, chunk_index: usize, token_count: usize, strategy: ChunkStrategy) -> Self {
        Self {
            text,
            chunk_index,
            token_count,
            hierarchy_path: None,
            section_title: None,
            strategy,
            chunk_type: ChunkType::Standalone,
            parent_index: None,
            parent_summary: None,
            has_overlap: false,
            overlap_tokens: 0,
            token_window: None,
        }
    }
}

/// Tunables shared by all strategies and the auto-selector.
#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub semantic_overlap_enabled: bool,
    pub semantic_overlap_tokens: usize,
    pub parent_chunk_multiplier: f32,
    pub parent_summary_max_length: usize,
    pub hierarchical_threshold_chars: usize,
    pub semantic_threshold_chars: usize,
    pub min_headers_for_semantic: usize,
}

impl ChunkingOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
            min_chunk_size: cfg.min_chunk_size,
            max_chunk_size: cfg.max_chunk_size,
            semantic_overlap_enabled: cfg.semantic_overlap_enabled,
            semantic_overlap_tokens: cfg.semantic_overlap_tokens,
            parent_chunk_multiplier: cfg.parent_chunk_multiplier,
            parent_summary_max_length: cfg.parent_summary_max_length,
            hierarchical_threshold_chars: cfg.hierarchical_threshold_chars,
            semantic_threshold_chars: cfg.semantic_threshold_chars,
            min_headers_for_semantic: cfg.min_headers_for_semantic,
        }
    }

    /// Token cap for one parent segment in hierarchical chunking.
    pub fn parent_segment_tokens(&self) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let size = (self.chunk_size as f32 * self.parent_chunk_multiplier.max(1.0)) as usize;
        size.max(self.chunk_size)
    }
}

#[cfg(test)]
impl Default for ChunkingOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Routes text to a chunking strategy and applies the shared size logging.
pub struct ChunkingEngine {
    tokenizer: Arc<Tokenizer>,
    options: ChunkingOptions,
}

impl ChunkingEngine {
    pub fn new(tokenizer: Arc<Tokenizer>, options: ChunkingOptions) -> Self {
        Self { tokenizer, options }
    }

    pub fn options(&self) -> &ChunkingOptions {
        &self.options
    }

    /// Chunks `text` under the named strategy; `"auto"` resolves through
    /// [`auto_select_strategy`], unknown names warn and fall back to simple.
    pub fn chunk(
        &self,
        text: &str,
        strategy_name: &str,
    ) -> Result<(ChunkStrategy, Vec<Chunk>), AppError> {
        let strategy = match strategy_name {
            "auto" => {
                let selected = auto_select_strategy(
                    text.len(),
                    markdown_parser::count_headers(text),
                    &self.options,
                );
                info!(strategy = selected.as_str(), "auto-selected chunking strategy");
                selected
            }
            "simple" => ChunkStrategy::Simple,
            "semantic" => ChunkStrategy::Semantic,
            "hierarchical" => ChunkStrategy::Hierarchical,
            other => {
                warn!(strategy = other, "unknown chunking strategy, falling back to simple");
                ChunkStrategy::Simple
            }
        };

        let started = Instant::now();
        info!(
            strategy = strategy.as_str(),
            text_chars = text.len(),
            chunk_size = self.options.chunk_size,
            chunk_overlap = self.options.chunk_overlap,
            "chunking started"
        );

        let chunks = match strategy {
            ChunkStrategy::Simple => simple::chunk(&self.tokenizer, text, &self.options)?,
            ChunkStrategy::Semantic => semantic::chunk(&self.tokenizer, text, &self.options)?,
            ChunkStrategy::Hierarchical => {
                hierarchical::chunk(&self.tokenizer, text, &self.options)?
            }
        };

        self.log_completion(strategy, &chunks, started);

        Ok((strategy, chunks))
    }

    fn log_completion(&self, strategy: ChunkStrategy, chunks: &[Chunk], started: Instant) {
        let total_tokens: usize = chunks.iter().map(|c| c.token_count).sum();
        let with_overlap = chunks.iter().filter(|c| c.has_overlap).count();

        for chunk in chunks {
            if chunk.token_count < self.options.min_chunk_size {
                warn!(
                    chunk_index = chunk.chunk_index,
                    tokens = chunk.token_count,
                    min = self.options.min_chunk_size,
                    "chunk below minimum size"
                );
            } else if chunk.token_count > self.options.max_chunk_size {
                warn!(
                    chunk_index = chunk.chunk_index,
                    tokens = chunk.token_count,
                    max = self.options.max_chunk_size,
                    "chunk above maximum size"
                );
            }
        }

        info!(
            strategy = strategy.as_str(),
            chunks = chunks.len(),
            total_tokens,
            avg_tokens = if chunks.is_empty() { 0 } else { total_tokens / chunks.len() },
            chunks_with_overlap = with_overlap,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "chunking completed"
        );
        debug!(
            min_tokens = chunks.iter().map(|c| c.token_count).min().unwrap_or(0),
            max_tokens = chunks.iter().map(|c| c.token_count).max().unwrap_or(0),
            "chunk size spread"
        );
    }
}

/// Pure strategy selection from `(text length, header count, thresholds)`.
pub fn auto_select_strategy(
    text_len: usize,
    header_count: usize,
    options: &ChunkingOptions,
) -> ChunkStrategy {
    if text_len > options.hierarchical_threshold_chars {
        ChunkStrategy::Hierarchical
    } else if header_count >= options.min_headers_for_semantic
        && text_len > options.semantic_threshold_chars
    {
        ChunkStrategy::Semantic
    } else if header_count >= options.min_headers_for_semantic && text_len > 3000 {
        ChunkStrategy::Semantic
    } else {
        ChunkStrategy::Simple
    }
}
