use std::collections::HashMap;

use common::{
    error::AppError,
    storage::vector::{ContentType, Payload, PayloadFilter, VectorStore},
};
use tracing::debug;

/// Okapi BM25 parameters.
const K1: f64 = 1.5;
const B: f64 = 0.75;

struct IndexedDoc {
    id: String,
    term_frequencies: HashMap<String, usize>,
    length: usize,
    payload: Payload,
}

/// In-memory BM25 index over the chunk corpus.
///
/// Rebuilt on demand from a bounded vector-store scroll; readers always see
/// a complete index because a new one replaces the old wholesale.
pub struct SparseIndex {
    docs: Vec<IndexedDoc>,
    document_frequencies: HashMap<String, usize>,
    average_length: f64,
}

impl SparseIndex {
    pub fn build(entries: Vec<(String, Payload)>) -> Self {
        let mut docs = Vec::with_capacity(entries.len());
        let mut document_frequencies: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        for (id, payload) in entries {
            let tokens = tokenize(&payload.text);
            let mut term_frequencies: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_frequencies.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_frequencies.keys() {
                *document_frequencies.entry(term.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len();
            docs.push(IndexedDoc {
                id,
                term_frequencies,
                length: tokens.len(),
                payload,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let average_length = if docs.is_empty() {
            0.0
        } else {
            total_length as f64 / docs.len() as f64
        };

        Self {
            docs,
            document_frequencies,
            average_length,
        }
    }

    /// Builds the index from the `content_type = chunk` points in the
    /// collection, optionally restricted to a document set, bounded by
    /// `max_corpus` points.
    pub async fn build_from_store(
        store: &VectorStore,
        collection: &str,
        document_filter: Option<&[String]>,
        max_corpus: usize,
    ) -> Result<Self, AppError> {
        let mut filter = PayloadFilter::new().content_type(ContentType::Chunk);
        if let Some(ids) = document_filter {
            filter = filter.one_of("document_id", ids.to_vec());
        }

        let mut entries = Vec::new();
        let mut cursor = None;
        while entries.len() < max_corpus {
            let page_size = 200.min(max_corpus - entries.len());
            let (points, next) = store.scroll(collection, &filter, page_size, cursor).await?;
            for point in points {
                entries.push((point.id, point.payload));
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        debug!(corpus = entries.len(), "sparse index rebuilt");
        Ok(Self::build(entries))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn payload(&self, id: &str) -> Option<&Payload> {
        self.docs.iter().find(|d| d.id == id).map(|d| &d.payload)
    }

    /// Scores the corpus against the query and returns the `top_k` best
    /// `(id, score)` pairs, descending. Zero-score documents are omitted.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        if self.docs.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        #[allow(clippy::cast_precision_loss)]
        let corpus_size = self.docs.len() as f64;

        let mut scored: Vec<(String, f64)> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let mut score = 0.0f64;
                for term in &query_terms {
                    let Some(&tf) = doc.term_frequencies.get(term) else {
                        continue;
                    };
                    #[allow(clippy::cast_precision_loss)]
                    let df = *self.document_frequencies.get(term).unwrap_or(&0) as f64;
                    let idf = ((corpus_size - df + 0.5) / (df + 0.5) + 1.0).ln();
                    #[allow(clippy::cast_precision_loss)]
                    let tf = tf as f64;
                    #[allow(clippy::cast_precision_loss)]
                    let length_norm =
                        1.0 - B + B * (doc.length as f64 / self.average_length.max(1.0));
                    score += idf * (tf * (K1 + 1.0)) / (tf + K1 * length_norm);
                }
                if score > 0.0 {
                    Some((doc.id.clone(), score))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Whitespace tokenization over lowercased text, stripped of surrounding
/// punctuation.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Payload {
        Payload::new("doc-1", ContentType::Chunk, text)
    }

    fn index(texts: &[&str]) -> SparseIndex {
        SparseIndex::build(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| (format!("c{i}"), payload(t)))
                .collect(),
        )
    }

    #[test]
    fn matching_documents_outscore_non_matching() {
        let index = index(&[
            "the quick brown fox jumps over the lazy dog",
            "an unrelated sentence about databases",
            "foxes are quick animals",
        ]);

        let results = index.search("quick fox", 3);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, "c0");
        assert!(results.iter().all(|(id, _)| id != "c1"));
    }

    #[test]
    fn term_repetition_saturates_rather_than_dominates() {
        let index = index(&[
            "refund refund refund refund refund",
            "refund policy for returned items explained simply",
        ]);

        let results = index.search("refund policy", 2);
        // The document matching both terms wins over pure repetition.
        assert_eq!(results[0].0, "c1");
    }

    #[test]
    fn scores_are_sorted_descending_and_truncated() {
        let index = index(&[
            "alpha beta",
            "alpha beta gamma",
            "alpha",
            "nothing relevant here",
        ]);

        let results = index.search("alpha beta gamma", 2);
        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
        assert_eq!(results[0].0, "c1");
    }

    #[test]
    fn empty_index_and_no_hits_return_empty() {
        assert!(index(&[]).search("anything", 5).is_empty());
        assert!(index(&["something"]).search("zzz", 5).is_empty());
    }

    #[test]
    fn tokenizer_lowercases_and_strips_punctuation() {
        assert_eq!(tokenize("Hello, World! 42"), vec!["hello", "world", "42"]);
    }

    #[tokio::test]
    async fn builds_from_a_bounded_scroll() {
        use common::storage::db::SurrealDbClient;
        use common::storage::vector::VectorPoint;
        use std::sync::Arc;
        use uuid::Uuid;

        let db = SurrealDbClient::memory("sparse_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        let store = VectorStore::new(Arc::new(db));
        store.ensure_collection("documents", 3).await.expect("ensure");

        let mut points = Vec::new();
        for i in 0..10 {
            let mut p = Payload::new("doc-1", ContentType::Chunk, format!("chunk number {i}"));
            p.chunk_index = Some(i);
            points.push(VectorPoint {
                id: format!("p{i}"),
                vector: vec![0.1, 0.2, 0.3],
                payload: p,
            });
        }
        // A summary point must not enter the sparse corpus.
        points.push(VectorPoint {
            id: "summary".into(),
            vector: vec![0.1, 0.2, 0.3],
            payload: Payload::new("doc-1", ContentType::Summary, "chunk summary"),
        });
        store.upsert("documents", points).await.expect("upsert");

        let index = SparseIndex::build_from_store(&store, "documents", None, 5)
            .await
            .expect("build");
        assert_eq!(index.len(), 5, "corpus bound must be honored");

        let full = SparseIndex::build_from_store(&store, "documents", None, 100)
            .await
            .expect("build");
        assert_eq!(full.len(), 10, "summary points are excluded");
    }
}
