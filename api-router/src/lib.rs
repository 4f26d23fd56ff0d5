#![allow(clippy::missing_docs_in_private_items)]

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};

pub mod api_state;
pub mod error;
pub mod middleware;
mod routes;

use api_state::ApiState;
use routes::{
    documents::{
        delete_document, get_document, get_document_chunks, list_documents, upload_document,
    },
    health::{live, ready},
    queries::{get_query, submit_query},
};

const UPLOAD_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// The platform's HTTP surface: documents, queries, health probes.
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let health = Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready));

    let api = Router::new()
        .route(
            "/documents",
            post(upload_document).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document))
        .route("/documents/{id}", delete(delete_document))
        .route("/documents/{id}/chunks", get(get_document_chunks))
        .route("/queries", post(submit_query))
        .route("/queries/{id}", get(get_query))
        .route_layer(from_fn_with_state(app_state.clone(), middleware::rate_limit));

    health
        .merge(api)
        .layer(from_fn(middleware::propagate_headers))
}
