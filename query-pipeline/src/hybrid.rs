use std::collections::HashMap;

use common::{
    error::AppError,
    storage::vector::{ContentType, PayloadFilter, VectorStore},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{sparse::SparseIndex, RetrievedChunk};

/// Fixed depth for the auxiliary dense lists (summaries, Q&A).
const AUXILIARY_TOP_K: usize = 5;

/// Per-source contribution counts for one hybrid search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchProvenance {
    pub vector_chunks: usize,
    pub vector_summaries: usize,
    pub vector_qa: usize,
    pub keyword_bm25: usize,
    pub after_merge: usize,
}

#[derive(Debug, Clone)]
pub struct HybridSearchConfig {
    pub rrf_k: u32,
    pub enable_hybrid: bool,
    pub enable_qa_matching: bool,
    pub bm25_max_corpus: usize,
}

/// Dense + sparse retrieval with Reciprocal Rank Fusion.
///
/// Four ranked lists are produced (chunk vectors, summary vectors, Q&A
/// vectors, BM25 keywords) and fused by summing `1 / (rrf_k + rank)` per
/// list; the merged top `top_k` is returned with provenance counts.
pub async fn hybrid_search(
    store: &VectorStore,
    collection: &str,
    query_embedding: Vec<f32>,
    query_text: &str,
    top_k: usize,
    document_filter: Option<&[String]>,
    config: &HybridSearchConfig,
) -> Result<(Vec<RetrievedChunk>, SearchProvenance), AppError> {
    let base_filter = |content: ContentType| {
        let mut filter = PayloadFilter::new().content_type(content);
        if let Some(ids) = document_filter {
            filter = filter.one_of("document_id", ids.to_vec());
        }
        filter
    };

    let chunk_hits = store
        .search(
            collection,
            query_embedding.clone(),
            &base_filter(ContentType::Chunk),
            top_k,
        )
        .await?;

    let summary_hits = store
        .search(
            collection,
            query_embedding.clone(),
            &base_filter(ContentType::Summary),
            AUXILIARY_TOP_K,
        )
        .await?;

    let qa_hits = if config.enable_qa_matching {
        let mut filter = PayloadFilter::new().one_of(
            "content_type",
            vec!["question".to_string(), "answer".to_string()],
        );
        if let Some(ids) = document_filter {
            filter = filter.one_of("document_id", ids.to_vec());
        }
        store
            .search(collection, query_embedding, &filter, AUXILIARY_TOP_K)
            .await?
    } else {
        Vec::new()
    };

    let mut candidates: HashMap<String, RetrievedChunk> = HashMap::new();
    let mut ranked_lists: Vec<Vec<String>> = Vec::with_capacity(4);

    for hits in [&chunk_hits, &summary_hits, &qa_hits] {
        let mut list = Vec::with_capacity(hits.len());
        for hit in hits {
            list.push(hit.id.clone());
            candidates
                .entry(hit.id.clone())
                .or_insert_with(|| RetrievedChunk::new(hit.id.clone(), hit.score, hit.payload.clone()));
        }
        ranked_lists.push(list);
    }

    let bm25_count = if config.enable_hybrid {
        let index = SparseIndex::build_from_store(
            store,
            collection,
            document_filter,
            config.bm25_max_corpus,
        )
        .await?;
        let bm25_hits = index.search(query_text, top_k);
        let mut list = Vec::with_capacity(bm25_hits.len());
        for (id, score) in &bm25_hits {
            list.push(id.clone());
            if !candidates.contains_key(id) {
                if let Some(payload) = index.payload(id) {
                    #[allow(clippy::cast_possible_truncation)]
                    candidates.insert(
                        id.clone(),
                        RetrievedChunk::new(id.clone(), *score as f32, payload.clone()),
                    );
                }
            }
        }
        let count = list.len();
        ranked_lists.push(list);
        count
    } else {
        ranked_lists.push(Vec::new());
        0
    };

    let fused = rrf_fuse(&ranked_lists, config.rrf_k);

    let provenance = SearchProvenance {
        vector_chunks: chunk_hits.len(),
        vector_summaries: summary_hits.len(),
        vector_qa: qa_hits.len(),
        keyword_bm25: bm25_count,
        after_merge: fused.len(),
    };

    let mut merged = Vec::with_capacity(top_k.min(fused.len()));
    for (id, fused_score) in fused.into_iter().take(top_k) {
        if let Some(mut chunk) = candidates.remove(&id) {
            #[allow(clippy::cast_possible_truncation)]
            {
                chunk.score = fused_score as f32;
            }
            merged.push(chunk);
        }
    }

    info!(
        vector_chunks = provenance.vector_chunks,
        vector_summaries = provenance.vector_summaries,
        vector_qa = provenance.vector_qa,
        keyword_bm25 = provenance.keyword_bm25,
        after_merge = provenance.after_merge,
        returned = merged.len(),
        "hybrid search fused"
    );

    Ok((merged, provenance))
}

/// Reciprocal Rank Fusion: each list contributes `1 / (k + rank)` (rank is
/// 1-indexed) for every id it contains; per-id contributions are summed and
/// the result sorted descending. Ties break on id for determinism.
pub fn rrf_fuse(ranked_lists: &[Vec<String>], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, id) in list.iter().enumerate() {
            let contribution = 1.0 / f64::from(k + u32::try_from(rank).unwrap_or(u32::MAX) + 1);
            *scores.entry(id.clone()).or_insert(0.0) += contribution;
        }
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}
