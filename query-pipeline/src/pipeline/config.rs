use common::utils::config::AppConfig;

use crate::hybrid::HybridSearchConfig;

/// Settings for one query run. Per-request overrides (top_k, rerank_top)
/// come from the job payload; everything else from application config.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub collection: String,
    pub top_k: usize,
    pub rerank_top: usize,
    pub max_iterations: usize,
    pub expand_top_k_step: usize,
    pub hybrid: HybridSearchConfig,
}

impl RetrievalConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            collection: cfg.vector_collection.clone(),
            top_k: cfg.default_top_k,
            rerank_top: cfg.default_rerank_top,
            max_iterations: cfg.max_agent_iterations.max(1),
            expand_top_k_step: cfg.expand_top_k_step,
            hybrid: HybridSearchConfig {
                rrf_k: cfg.rrf_k,
                enable_hybrid: cfg.enable_hybrid_search,
                enable_qa_matching: cfg.enable_qa_matching,
                bm25_max_corpus: cfg.bm25_max_corpus,
            },
        }
    }

    pub fn with_overrides(mut self, top_k: Option<usize>, rerank_top: Option<usize>) -> Self {
        if let Some(top_k) = top_k {
            self.top_k = top_k.max(1);
        }
        if let Some(rerank_top) = rerank_top {
            self.rerank_top = rerank_top.max(1);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_defaults_and_clamp_to_one() {
        let config = RetrievalConfig::from_config(&AppConfig::default());
        assert_eq!(config.top_k, 20);
        assert_eq!(config.rerank_top, 5);
        assert_eq!(config.max_iterations, 3);

        let overridden = config.with_overrides(Some(40), Some(0));
        assert_eq!(overridden.top_k, 40);
        assert_eq!(overridden.rerank_top, 1);
    }
}
