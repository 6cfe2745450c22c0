use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{get, put},
    Json, Router,
};
use axum_client_ip::InsecureClientIp;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::pipeline::{Accepted, Pipeline, RawRequest};
use crate::request::request_id;

#[derive(Clone)]
pub struct AppState {
    pub pg_pool: PgPool,
    pub pipeline: Pipeline,
}

pub fn create_router(state: AppState) -> Router {
    // Multipart framing adds to the part bytes counted against the batch
    // limit, leave room so oversized batches get a proper 400.
    let body_limit = state
        .pipeline
        .settings
        .max_batch_size_bytes
        .saturating_mul(2);

    let cors = CorsLayer::new()
        .allow_methods([Method::PUT, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_origin(AllowOrigin::mirror_request());

    let api_routes = Router::new()
        .route("/api/apps/:app_id/events", put(put_events).post(put_events))
        .layer(DefaultBodyLimit::max(body_limit));

    let health_routes = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn put_events(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    ip: Option<InsecureClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let id = request_id(&headers)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| IngestError::Malformed("missing Content-Type".to_string()))?
        .to_string();

    tracing::debug!(request_id = %id, app_id = %app_id, bytes = body.len(), "ingest request received");

    let raw = RawRequest {
        id,
        app_id,
        content_type,
        body,
        client_ip: ip.map(|InsecureClientIp(addr)| addr),
    };

    let message = match state.pipeline.ingest(raw).await? {
        Accepted::Processed { .. } => "accepted",
        Accepted::AlreadyDone => "accepted, known event request",
    };

    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": message }))))
}

async fn index() -> &'static str {
    "ingest service"
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<AppState>) -> std::result::Result<&'static str, StatusCode> {
    sqlx::query("SELECT 1")
        .execute(&state.pg_pool)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    state
        .pipeline
        .writer
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok("ok")
}
