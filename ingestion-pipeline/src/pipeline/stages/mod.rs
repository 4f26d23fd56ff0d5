use common::{
    error::AppError,
    storage::vector::{ContentType, Payload, VectorPoint},
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    context::PipelineContext,
    state::{Analyzed, Chunked, Converted, Embedded, Enriched, IngestionMachine, Persisted, Ready},
};
use crate::{
    chunking::{Chunk, ChunkType},
    language::{self, SizeCategory},
    pipeline::services::DocumentArtifacts,
    qa::QaPair,
    tree,
};

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn convert(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Converted>, AppError> {
    let data = ctx.services.fetch_original(&ctx.task.file_path).await?;

    let mime_type = ctx
        .task
        .mime_type
        .clone()
        .or_else(|| {
            mime_guess::from_path(&ctx.task.original_filename)
                .first_raw()
                .map(str::to_string)
        })
        .ok_or_else(|| {
            AppError::Validation(format!(
                "cannot determine mime type for {}",
                ctx.task.original_filename
            ))
        })?;

    let converted = ctx.services.convert(&data, &mime_type).await?;

    info!(
        task_id = %ctx.task_id,
        document_id = %ctx.task.document_id,
        mime_type = %mime_type,
        markdown_chars = converted.markdown.len(),
        "conversion finished"
    );

    ctx.converted = Some(converted);

    machine
        .convert()
        .map_err(|(_, guard)| map_guard_error("convert", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn analyze(
    machine: IngestionMachine<(), Converted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Analyzed>, AppError> {
    let converted = ctx.converted()?;
    let document_tree = tree::build_tree(
        &converted.markdown,
        &converted.structure,
        &converted.image_descriptions,
    );

    let token_count = ctx.services.count_tokens(&document_tree.text);
    let size = SizeCategory::from_token_count(token_count);
    let report = language::detect(&document_tree.text, size);

    debug!(
        task_id = %ctx.task_id,
        token_count,
        size = ?size,
        language = %report.primary,
        "document analyzed"
    );

    ctx.tree = Some(document_tree);
    ctx.token_count = token_count;
    ctx.size = Some(size);
    ctx.language = Some(report);

    machine
        .analyze()
        .map_err(|(_, guard)| map_guard_error("analyze", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn enrich(
    machine: IngestionMachine<(), Analyzed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Enriched>, AppError> {
    let tree = ctx.tree()?;
    let size = ctx.size()?;
    let filename = &ctx.task.original_filename;
    let mime_type = ctx.task.mime_type.as_deref().unwrap_or("text/plain");

    let summary = ctx
        .services
        .summarize(tree, ctx.token_count, filename, mime_type)
        .await?;
    let qa_pairs = ctx
        .services
        .generate_qa(tree, size, filename, mime_type)
        .await?;

    info!(
        task_id = %ctx.task_id,
        summary_method = ?summary.method,
        summary_chars = summary.text.len(),
        qa_pairs = qa_pairs.len(),
        "enrichment finished"
    );

    ctx.summary = Some(summary);
    ctx.qa_pairs = qa_pairs;

    machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn chunk(
    machine: IngestionMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let tree = ctx.tree()?;
    let (strategy, chunks) = ctx.services.chunk(&tree.text)?;

    if chunks.is_empty() {
        return Err(AppError::DocumentProcessing {
            stage: "chunking".into(),
            message: "document produced no chunks".into(),
        });
    }

    ctx.strategy = Some(strategy);
    ctx.chunks = chunks;

    machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let payloads = build_payloads(
        &ctx.task.document_id,
        &ctx.chunks,
        ctx.summary.as_ref().map(|s| s.text.as_str()),
        &ctx.qa_pairs,
        ctx.language.as_ref().map(|l| l.primary.as_str()),
        ctx.language.as_ref().map(|l| l.is_multilingual),
    );

    let texts: Vec<String> = payloads.iter().map(|p| p.text.clone()).collect();
    let vectors = ctx.services.embed_batch(&texts).await?;

    if vectors.len() != payloads.len() {
        return Err(AppError::Embedding(format!(
            "embedding count mismatch: {} vectors for {} inputs",
            vectors.len(),
            payloads.len()
        )));
    }

    ctx.points = payloads
        .into_iter()
        .zip(vectors)
        .map(|(payload, vector)| VectorPoint {
            id: Uuid::new_v4().to_string(),
            vector,
            payload,
        })
        .collect();

    info!(
        task_id = %ctx.task_id,
        points = ctx.points.len(),
        "embeddings generated"
    );

    machine
        .embed()
        .map_err(|(_, guard)| map_guard_error("embed", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, document_id = %ctx.task.document_id)
)]
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let points = std::mem::take(&mut ctx.points);
    let point_count = points.len();
    ctx.services.persist_vectors(points).await?;
    ctx.vector_count = point_count;

    let tree = ctx.tree()?;
    let artifacts = DocumentArtifacts {
        markdown: &tree.text,
        metadata: serde_json::json!({
            "metadata": tree.metadata,
            "structure": {
                "sections": tree.structure.sections.len(),
                "tables": tree.structure.tables.len(),
                "images": tree.structure.images.len(),
            },
            "language": &ctx.language,
            "chunking_strategy": ctx.strategy.map(|s| s.as_str()),
            "token_count": ctx.token_count,
        }),
        summary: ctx.summary.as_ref().map_or("", |s| s.text.as_str()),
        qa_pairs: &ctx.qa_pairs,
    };
    ctx.services
        .store_artifacts(&ctx.task.document_id, artifacts)
        .await?;

    info!(
        task_id = %ctx.task_id,
        document_id = %ctx.task.document_id,
        points = point_count,
        "persistence flushed"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

/// Payloads for every vector point of a document, in embedding order:
/// chunks first, then the summary, then question/answer pairs.
pub fn build_payloads(
    document_id: &str,
    chunks: &[Chunk],
    summary: Option<&str>,
    qa_pairs: &[QaPair],
    language: Option<&str>,
    is_multilingual: Option<bool>,
) -> Vec<Payload> {
    let mut payloads = Vec::with_capacity(chunks.len() + 1 + qa_pairs.len() * 2);

    for chunk in chunks {
        let mut payload = Payload::new(document_id, ContentType::Chunk, chunk.text.clone());
        payload.chunk_index = Some(chunk.chunk_index as i64);
        payload.section = chunk.section_title.clone();
        payload.hierarchy_path = chunk.hierarchy_path.clone();
        payload.chunk_type = Some(
            match chunk.chunk_type {
                ChunkType::Standalone => "standalone",
                ChunkType::Parent => "parent",
                ChunkType::Child => "child",
            }
            .to_string(),
        );
        payload.parent_id = chunk.parent_index.map(|i| i as i64);
        payload.language = language.map(str::to_string);
        payload.is_multilingual = is_multilingual;
        payload.metadata = serde_json::json!({
            "chunking_strategy": chunk.strategy.as_str(),
            "token_count": chunk.token_count,
            "has_overlap": chunk.has_overlap,
            "overlap_tokens": chunk.overlap_tokens,
            "parent_summary": chunk.parent_summary,
        });
        payloads.push(payload);
    }

    if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
        payloads.push(Payload::new(document_id, ContentType::Summary, summary));
    }

    for pair in qa_pairs {
        let qa_type = serde_json::to_value(pair.qa_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string));

        let mut question = Payload::new(document_id, ContentType::Question, pair.question.clone());
        question.counterpart = Some(pair.answer.clone());
        question.qa_type = qa_type.clone();
        payloads.push(question);

        let mut answer = Payload::new(document_id, ContentType::Answer, pair.answer.clone());
        answer.counterpart = Some(pair.question.clone());
        answer.qa_type = qa_type;
        payloads.push(answer);
    }

    payloads
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkStrategy;
    use crate::qa::QaType;

    fn chunk(index: usize, chunk_type: ChunkType, parent: Option<usize>) -> Chunk {
        let mut c = Chunk::new(format!("chunk {index}"), index, 3, ChunkStrategy::Hierarchical);
        c.chunk_type = chunk_type;
        c.parent_index = parent;
        c
    }

    #[test]
    fn payloads_cover_all_content_types_in_order() {
        let chunks = vec![
            chunk(0, ChunkType::Parent, None),
            chunk(1, ChunkType::Child, Some(0)),
        ];
        let qa = vec![QaPair {
            question: "Q?".into(),
            answer: "A.".into(),
            qa_type: QaType::Factual,
        }];

        let payloads = build_payloads("doc-1", &chunks, Some("summary"), &qa, Some("eng"), Some(false));

        assert_eq!(payloads.len(), 5);
        assert_eq!(payloads[0].content_type, ContentType::Chunk);
        assert_eq!(payloads[0].chunk_type.as_deref(), Some("parent"));
        assert_eq!(payloads[1].parent_id, Some(0));
        assert_eq!(payloads[2].content_type, ContentType::Summary);
        assert_eq!(payloads[3].content_type, ContentType::Question);
        assert_eq!(payloads[3].counterpart.as_deref(), Some("A."));
        assert_eq!(payloads[3].qa_type.as_deref(), Some("factual"));
        assert_eq!(payloads[4].content_type, ContentType::Answer);
        assert!(payloads.iter().all(|p| p.document_id == "doc-1"));
    }

    #[test]
    fn empty_summary_is_not_stored() {
        let payloads = build_payloads("doc-1", &[], Some("   "), &[], None, None);
        assert!(payloads.is_empty());
    }
}
