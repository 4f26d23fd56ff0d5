use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::{
    error::AppError,
    storage::types::{query::Query, query_task::QueryTask},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SubmitQueryRequest {
    pub query_text: String,
    pub document_filter: Option<Vec<String>>,
    #[serde(default)]
    pub debug_mode: bool,
    pub top_k: Option<usize>,
    pub rerank_top: Option<usize>,
}

/// Accepts a query and hands it to the query worker. 202 because the
/// agentic loop runs asynchronously.
pub async fn submit_query(
    State(state): State<ApiState>,
    Json(request): Json<SubmitQueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.query_text.trim().is_empty() {
        return Err(ApiError::validation("query_text must not be empty"));
    }
    if let Some(filter) = &request.document_filter {
        if filter.is_empty() {
            return Err(ApiError::validation(
                "document_filter must not be an empty list",
            ));
        }
    }

    let query = Query::new(
        request.query_text.clone(),
        request.document_filter.clone(),
        request.debug_mode,
    );
    let query_id = query.id.clone();

    state.db.store_item(query).await.map_err(AppError::from)?;

    QueryTask::new(
        query_id.clone(),
        request.query_text,
        request.document_filter,
        request.debug_mode,
        request.top_k,
        request.rerank_top,
        None,
    )
    .enqueue(&state.db)
    .await?;

    info!(%query_id, "query accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": query_id, "status": "pending" })),
    ))
}

pub async fn get_query(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let query: Query = state
        .db
        .get_item(&id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| ApiError::not_found(format!("query '{id}' not found")))?;

    // Debug data is only exposed when the submitter asked for it.
    let debug_data = if query.debug_mode {
        query.debug_data.clone()
    } else {
        None
    };

    Ok(Json(json!({
        "id": query.id,
        "query_text": query.query_text,
        "status": query.status,
        "answer": query.answer,
        "citations": query.citations,
        "document_filter": query.document_filter,
        "latency_ms": query.latency_ms,
        "error_message": query.error_message,
        "debug_data": debug_data,
        "created_at": query.created_at,
    })))
}
