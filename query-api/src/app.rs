use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    routing::get,
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::aggregator::get_metrics;
use crate::issues::{get_anr_group, get_anr_group_anrs, get_crash_group, get_crash_group_crashes};
use crate::journey::get_journey;
use crate::presign::UrlSigner;
use crate::store::EventStore;

#[derive(Clone)]
pub struct AppState {
    pub pg_pool: PgPool,
    pub events: Arc<dyn EventStore>,
    pub signer: Arc<dyn UrlSigner>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_origin(AllowOrigin::mirror_request());

    let api_routes = Router::new()
        .route("/api/apps/:app_id/crashGroups/:group_id", get(get_crash_group))
        .route(
            "/api/apps/:app_id/crashGroups/:group_id/crashes",
            get(get_crash_group_crashes),
        )
        .route("/api/apps/:app_id/anrGroups/:group_id", get(get_anr_group))
        .route(
            "/api/apps/:app_id/anrGroups/:group_id/anrs",
            get(get_anr_group_anrs),
        )
        .route("/api/apps/:app_id/metrics", get(get_metrics))
        .route("/api/apps/:app_id/journey", get(get_journey));

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

async fn index() -> &'static str {
    "query api"
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    sqlx::query("SELECT 1")
        .execute(&state.pg_pool)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    state
        .events
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok("ok")
}
