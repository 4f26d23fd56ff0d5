use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use common::storage::types::rate_limit::RateLimit;
use uuid::Uuid;

use crate::{api_state::ApiState, error::ApiError};

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub const RESPONSE_TIME_MS: HeaderName = HeaderName::from_static("x-response-time-ms");

const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Stamps request/correlation ids on the way in and the processing time on
/// the way out; both ids propagate across hops unchanged when present.
pub async fn propagate_headers(mut request: Request, next: Next) -> Response {
    let started = Instant::now();

    let request_id = request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID.clone(), value);
    }

    let correlation_id = request
        .headers()
        .get(&CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID.clone(), value);
    }
    if let Some(correlation_id) = correlation_id {
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            headers.insert(CORRELATION_ID.clone(), value);
        }
    }
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms.to_string()) {
        headers.insert(RESPONSE_TIME_MS.clone(), value);
    }

    response
}

/// Fixed-window rate limiting backed by the relational store, so the limit
/// holds across replicas. Health probes are exempt.
pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path.starts_with("/health") {
        return next.run(request).await;
    }

    let key = client_key(&request);
    let decision = RateLimit::check_and_increment(
        &state.db,
        &key,
        Utc::now().timestamp(),
        RATE_LIMIT_WINDOW_SECS,
        state.config.rate_limit_per_minute,
    )
    .await;

    match decision {
        Ok(decision) if decision.allowed => next.run(request).await,
        Ok(decision) => {
            tracing::warn!(%key, "rate limit exceeded");
            ApiError::rate_limited(decision.reset_after_secs).into_response()
        }
        Err(err) => {
            // A failing limiter admits rather than blocks.
            tracing::error!(error = %err, "rate limit check failed, admitting request");
            next.run(request).await
        }
    }
}

fn client_key(request: &Request) -> String {
    if let Some(api_key) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        return format!("api_key:{api_key}");
    }

    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown");
    format!("ip:{ip}")
}
