use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        store::layout,
        types::{
            document::{Document, DocumentStatus},
            ingestion_task::IngestionTask,
        },
        vector::PayloadFilter,
    },
};
use ingestion_pipeline::convert::is_supported_mime;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

/// Uploads one document: object store write, relational record, ingestion
/// job. Returns 202 since processing is asynchronous.
pub async fn upload_document(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::validation("file part must carry a filename"))?;
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation(format!("failed to read upload: {e}")))?;
        upload = Some((filename, content_type, data));
        break;
    }

    let Some((filename, content_type, data)) = upload else {
        return Err(ApiError::validation("multipart body must contain a 'file' part"));
    };
    if data.is_empty() {
        return Err(ApiError::validation("uploaded file is empty"));
    }

    let mime_type = content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| {
            mime_guess::from_path(&filename)
                .first_raw()
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::validation("cannot determine content type of upload"))?;

    if !is_supported_mime(&mime_type) {
        return Err(ApiError::validation(format!(
            "unsupported content type: {mime_type}"
        )));
    }

    let document = Document::new(filename.clone(), mime_type.clone(), data.len() as u64);
    let document_id = document.id.clone();

    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let file_path = layout::original(&document_id, extension);

    state
        .storage
        .put(&file_path, data)
        .await
        .map_err(AppError::from)?;
    state
        .db
        .store_item(document)
        .await
        .map_err(AppError::from)?;

    IngestionTask::new(
        document_id.clone(),
        file_path,
        filename.clone(),
        Some(mime_type),
        None,
    )
    .enqueue(&state.db)
    .await?;

    info!(%document_id, %filename, "document accepted for ingestion");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": document_id,
            "filename": filename,
            "status": DocumentStatus::Pending.as_str(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_documents(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match params.status.as_deref() {
        Some(raw) => Some(
            DocumentStatus::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("unknown status filter: {raw}")))?,
        ),
        None => None,
    };

    let documents = Document::list(
        &state.db,
        status,
        params.limit.unwrap_or(50).min(200),
        params.offset.unwrap_or(0),
    )
    .await?;

    Ok(Json(json!({
        "documents": documents,
        "count": documents.len(),
    })))
}

pub async fn get_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document: Document = state
        .db
        .get_item(&id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::not_found(format!("document '{id}' not found")))?;

    Ok(Json(document))
}

/// The chunk listing is a scroll over the vector store, ordered by chunk
/// index.
pub async fn get_document_chunks(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document: Option<Document> = state.db.get_item(&id).await.map_err(AppError::from)?;
    if document.is_none() {
        return Err(ApiError::not_found(format!("document '{id}' not found")));
    }

    let chunks = state
        .vector_store
        .list_document_chunks(&state.config.vector_collection, &id)
        .await?;

    let payloads: Vec<_> = chunks
        .into_iter()
        .map(|point| {
            json!({
                "id": point.id,
                "chunk_index": point.payload.chunk_index,
                "text": point.payload.text,
                "section": point.payload.section,
                "hierarchy_path": point.payload.hierarchy_path,
                "chunk_type": point.payload.chunk_type,
                "parent_id": point.payload.parent_id,
            })
        })
        .collect();

    Ok(Json(json!({ "document_id": id, "chunks": payloads })))
}

/// Deletes the document and cascades through its vectors and artifacts.
/// Cross-store cleanup is best-effort: failures are surfaced as warnings but
/// never block the relational deletion.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document: Option<Document> = state.db.get_item(&id).await.map_err(AppError::from)?;
    if document.is_none() {
        return Err(ApiError::not_found(format!("document '{id}' not found")));
    }

    let mut warnings: Vec<String> = Vec::new();

    if let Err(err) = state
        .vector_store
        .delete(
            &state.config.vector_collection,
            &PayloadFilter::new().document_id(&id),
        )
        .await
    {
        warn!(document_id = %id, error = %err, "vector cleanup failed");
        warnings.push(format!("vector cleanup failed: {err}"));
    }

    if let Err(err) = state.storage.delete_prefix(&id).await {
        warn!(document_id = %id, error = %err, "object store cleanup failed");
        warnings.push(format!("object store cleanup failed: {err}"));
    }

    state
        .db
        .delete_item::<Document>(&id)
        .await
        .map_err(AppError::from)?;

    info!(document_id = %id, warnings = warnings.len(), "document deleted");

    Ok(Json(json!({
        "id": id,
        "status": "deleted",
        "warnings": warnings,
    })))
}
