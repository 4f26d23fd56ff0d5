use std::sync::Arc;

use serde::{de, Deserialize, Deserializer, Serialize};
use surrealdb::sql::Thing;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

/// Discriminant carried by every stored point; retrieval filters on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Chunk,
    Summary,
    Question,
    Answer,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::Summary => "summary",
            Self::Question => "question",
            Self::Answer => "answer",
        }
    }
}

/// Payload stored next to each vector. `document_id`, `content_type` and
/// `text` are always present; the remaining fields are type-specific.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub document_id: String,
    pub content_type: ContentType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_multilingual: Option<bool>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Payload {
    pub fn new(
        document_id: impl Into<String>,
        content_type: ContentType,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            content_type,
            text: text.into(),
            chunk_index: None,
            section: None,
            hierarchy_path: None,
            chunk_type: None,
            parent_id: None,
            qa_type: None,
            counterpart: None,
            language: None,
            is_multilingual: None,
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A search hit: point id, cosine similarity, payload.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Conjunction of equality / IN predicates over payload fields.
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    equals: Vec<(&'static str, serde_json::Value)>,
    any_of: Vec<(&'static str, Vec<String>)>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.equals.push((field, value.into()));
        self
    }

    pub fn content_type(self, content_type: ContentType) -> Self {
        self.eq("content_type", content_type.as_str())
    }

    pub fn document_id(self, document_id: &str) -> Self {
        self.eq("document_id", document_id)
    }

    pub fn one_of(mut self, field: &'static str, values: Vec<String>) -> Self {
        self.any_of.push((field, values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.any_of.is_empty()
    }

    /// Compiles the filter into a WHERE fragment plus bind pairs. Field names
    /// are compile-time constants; only values are bound.
    fn compile(&self, bind_prefix: &str) -> (String, Vec<(String, serde_json::Value)>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        for (i, (field, value)) in self.equals.iter().enumerate() {
            let bind = format!("{bind_prefix}eq{i}");
            clauses.push(format!("payload.{field} = ${bind}"));
            binds.push((bind, value.clone()));
        }
        for (i, (field, values)) in self.any_of.iter().enumerate() {
            let bind = format!("{bind_prefix}in{i}");
            clauses.push(format!("payload.{field} IN ${bind}"));
            binds.push((bind, serde_json::json!(values)));
        }

        (clauses.join(" AND "), binds)
    }
}

/// Search-time HNSW candidate pool size.
const HNSW_EF: usize = 100;

/// Named-collection vector storage on SurrealDB. Collections are tables with
/// a `vector` field under an HNSW index and a nested `payload` object.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<SurrealDbClient>,
}

impl VectorStore {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Idempotently defines the collection table and its indexes. Repeated
    /// calls never alter an existing collection.
    pub async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), AppError> {
        validate_collection_name(name)?;

        let sql = format!(
            "DEFINE TABLE IF NOT EXISTS {name} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS idx_{name}_vector ON TABLE {name} FIELDS vector HNSW DIMENSION {dimension} DIST COSINE;
             DEFINE INDEX IF NOT EXISTS idx_{name}_document ON TABLE {name} FIELDS payload.document_id;"
        );

        self.db
            .client
            .query(sql)
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Upserts a batch of points inside one transaction; the batch either
    /// lands completely or not at all.
    pub async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<(), AppError> {
        validate_collection_name(name)?;
        if points.is_empty() {
            return Ok(());
        }

        let sql = "
            BEGIN TRANSACTION;
            FOR $point IN $points {
                UPSERT type::thing($tb, $point.id) CONTENT {
                    vector: $point.vector,
                    payload: $point.payload
                };
            };
            COMMIT TRANSACTION;
        ";

        let response = self
            .db
            .client
            .query(sql)
            .bind(("tb", name.to_string()))
            .bind(("points", points))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Cosine similarity search over the collection, restricted by `filter`.
    pub async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        filter: &PayloadFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        validate_collection_name(name)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "deserialize_record_id")]
            id: String,
            score: f32,
            payload: Payload,
        }

        let (filter_sql, binds) = filter.compile("f_");
        let where_clause = if filter_sql.is_empty() {
            format!("vector <|{top_k},{HNSW_EF}|> $embedding")
        } else {
            format!("{filter_sql} AND vector <|{top_k},{HNSW_EF}|> $embedding")
        };

        let sql = format!(
            "SELECT id, payload, vector::similarity::cosine(vector, $embedding) AS score
             FROM {name}
             WHERE {where_clause}
             ORDER BY score DESC
             LIMIT {top_k};"
        );

        let mut query = self.db.query(sql).bind(("embedding", vector));
        for (bind, value) in binds {
            query = query.bind((bind, value));
        }

        let mut response = query.await.map_err(AppError::Database)?;
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| ScoredPoint {
                id: r.id,
                score: r.score,
                payload: r.payload,
            })
            .collect())
    }

    /// Paginated enumeration ordered by record id. Returns the page and the
    /// cursor to pass back for the next page, or `None` when exhausted.
    pub async fn scroll(
        &self,
        name: &str,
        filter: &PayloadFilter,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<(Vec<VectorPoint>, Option<String>), AppError> {
        validate_collection_name(name)?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "deserialize_record_id")]
            id: String,
            vector: Vec<f32>,
            payload: Payload,
        }

        let (filter_sql, binds) = filter.compile("f_");
        let mut clauses = Vec::new();
        if !filter_sql.is_empty() {
            clauses.push(filter_sql);
        }
        if cursor.is_some() {
            clauses.push("id > type::thing($tb, $after)".to_string());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT id, vector, payload FROM {name} {where_clause} ORDER BY id ASC LIMIT {limit};"
        );

        let mut query = self.db.query(sql).bind(("tb", name.to_string()));
        if let Some(after) = cursor {
            query = query.bind(("after", after));
        }
        for (bind, value) in binds {
            query = query.bind((bind, value));
        }

        let mut response = query.await.map_err(AppError::Database)?;
        let rows: Vec<Row> = response.take(0).map_err(AppError::Database)?;

        let next_cursor = if rows.len() == limit {
            rows.last().map(|r| r.id.clone())
        } else {
            None
        };

        let points = rows
            .into_iter()
            .map(|r| VectorPoint {
                id: r.id,
                vector: r.vector,
                payload: r.payload,
            })
            .collect();

        Ok((points, next_cursor))
    }

    /// Removes every point matching the filter.
    pub async fn delete(&self, name: &str, filter: &PayloadFilter) -> Result<(), AppError> {
        validate_collection_name(name)?;

        let (filter_sql, binds) = filter.compile("f_");
        let sql = if filter_sql.is_empty() {
            format!("DELETE FROM {name};")
        } else {
            format!("DELETE FROM {name} WHERE {filter_sql};")
        };

        let mut query = self.db.query(sql);
        for (bind, value) in binds {
            query = query.bind((bind, value));
        }

        query.await.map_err(AppError::Database)?;

        Ok(())
    }

    /// All chunk points of a document, ordered by chunk index. Backs the
    /// chunk-listing endpoint.
    pub async fn list_document_chunks(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<Vec<VectorPoint>, AppError> {
        let filter = PayloadFilter::new()
            .document_id(document_id)
            .content_type(ContentType::Chunk);

        let mut all = Vec::new();
        let mut cursor = None;
        loop {
            let (mut page, next) = self.scroll(name, &filter, 200, cursor).await?;
            all.append(&mut page);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        all.sort_by_key(|p| p.payload.chunk_index.unwrap_or(i64::MAX));
        Ok(all)
    }
}

fn validate_collection_name(name: &str) -> Result<(), AppError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "invalid collection name: {name}"
        )))
    }
}

fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct IdVisitor;

    impl<'de> de::Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or a Thing")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value.to_string())
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
            Ok(value)
        }

        fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
            Ok(thing.id.to_raw())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_store() -> VectorStore {
        let db = SurrealDbClient::memory("vector_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb");
        VectorStore::new(Arc::new(db))
    }

    fn chunk_point(id: &str, document_id: &str, index: i64, vector: Vec<f32>) -> VectorPoint {
        let mut payload = Payload::new(document_id, ContentType::Chunk, format!("text {id}"));
        payload.chunk_index = Some(index);
        VectorPoint {
            id: id.to_string(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let store = test_store().await;
        store.ensure_collection("docs", 3).await.expect("first");
        store.ensure_collection("docs", 3).await.expect("second");

        store
            .upsert("docs", vec![chunk_point("a", "d1", 0, vec![1.0, 0.0, 0.0])])
            .await
            .expect("upsert");

        // A third ensure call must not disturb existing points.
        store.ensure_collection("docs", 3).await.expect("third");
        let results = store
            .search("docs", vec![1.0, 0.0, 0.0], &PayloadFilter::new(), 5)
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn rejects_invalid_collection_names() {
        let store = test_store().await;
        assert!(matches!(
            store.ensure_collection("Bad-Name", 3).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_honors_filters() {
        let store = test_store().await;
        store.ensure_collection("docs", 3).await.expect("ensure");

        store
            .upsert(
                "docs",
                vec![
                    chunk_point("a", "d1", 0, vec![1.0, 0.0, 0.0]),
                    chunk_point("b", "d1", 1, vec![0.0, 1.0, 0.0]),
                    chunk_point("c", "d2", 0, vec![0.9, 0.1, 0.0]),
                ],
            )
            .await
            .expect("upsert");

        let results = store
            .search(
                "docs",
                vec![1.0, 0.0, 0.0],
                &PayloadFilter::new().content_type(ContentType::Chunk),
                3,
            )
            .await
            .expect("search");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "a");
        assert!(results[0].score >= results[1].score);

        let filtered = store
            .search(
                "docs",
                vec![1.0, 0.0, 0.0],
                &PayloadFilter::new().one_of("document_id", vec!["d2".to_string()]),
                3,
            )
            .await
            .expect("filtered search");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");
    }

    #[tokio::test]
    async fn delete_by_document_filter_removes_all_points() {
        let store = test_store().await;
        store.ensure_collection("docs", 3).await.expect("ensure");

        store
            .upsert(
                "docs",
                vec![
                    chunk_point("a", "d1", 0, vec![1.0, 0.0, 0.0]),
                    chunk_point("b", "d1", 1, vec![0.0, 1.0, 0.0]),
                    chunk_point("c", "d2", 0, vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .expect("upsert");

        store
            .delete("docs", &PayloadFilter::new().document_id("d1"))
            .await
            .expect("delete");

        let remaining = store
            .search("docs", vec![1.0, 0.0, 0.0], &PayloadFilter::new(), 10)
            .await
            .expect("search");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload.document_id, "d2");
    }

    #[tokio::test]
    async fn scroll_paginates_with_cursor() {
        let store = test_store().await;
        store.ensure_collection("docs", 3).await.expect("ensure");

        let points: Vec<VectorPoint> = (0..5)
            .map(|i| chunk_point(&format!("p{i}"), "d1", i, vec![0.1, 0.2, 0.3]))
            .collect();
        store.upsert("docs", points).await.expect("upsert");

        let filter = PayloadFilter::new().document_id("d1");
        let (first_page, cursor) = store.scroll("docs", &filter, 2, None).await.expect("page 1");
        assert_eq!(first_page.len(), 2);
        let cursor = cursor.expect("expected a next cursor");

        let (second_page, cursor2) = store
            .scroll("docs", &filter, 2, Some(cursor))
            .await
            .expect("page 2");
        assert_eq!(second_page.len(), 2);
        assert!(second_page
            .iter()
            .all(|p| first_page.iter().all(|f| f.id != p.id)));

        let (rest, end) = store
            .scroll("docs", &filter, 2, cursor2)
            .await
            .expect("page 3");
        assert_eq!(rest.len(), 1);
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn list_document_chunks_orders_by_chunk_index() {
        let store = test_store().await;
        store.ensure_collection("docs", 3).await.expect("ensure");

        store
            .upsert(
                "docs",
                vec![
                    chunk_point("z", "d1", 2, vec![0.1, 0.1, 0.1]),
                    chunk_point("a", "d1", 0, vec![0.1, 0.1, 0.1]),
                    chunk_point("m", "d1", 1, vec![0.1, 0.1, 0.1]),
                ],
            )
            .await
            .expect("upsert");

        let chunks = store
            .list_document_chunks("docs", "d1")
            .await
            .expect("list");
        let indices: Vec<i64> = chunks
            .iter()
            .map(|p| p.payload.chunk_index.unwrap())
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
