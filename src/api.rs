//! Trigger endpoints.
//!
//! Two entry points share the batch-processing routine: a GET endpoint for
//! the external time-based scheduler, authenticated by a shared secret in a
//! query parameter or bearer header, and a POST endpoint for administrative
//! re-dispatch. Role checks for admin users live in the surrounding
//! platform; this service only verifies the shared secret.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::filehost::FileHostService;
use crate::graph::GraphService;
use crate::runner::{self, BatchReport};
use crate::storage::StorageService;

/// Shared application context passed to all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub graph: Arc<dyn GraphService>,
    pub filehost: Arc<dyn FileHostService>,
    pub storage: Arc<dyn StorageService>,
    pub trigger_secret: String,
    pub batch_cap: u32,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publish/run", get(run_cron).post(run_manual))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CronParams {
    secret: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "publisher".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "invalid trigger secret".to_string(),
        }),
    )
}

/// GET entry point for the external scheduler.
async fn run_cron(
    State(ctx): State<AppContext>,
    Query(params): Query<CronParams>,
    headers: HeaderMap,
) -> Result<Json<BatchReport>, (StatusCode, Json<ErrorResponse>)> {
    let presented = params.secret.as_deref().or_else(|| bearer_token(&headers));
    if presented != Some(ctx.trigger_secret.as_str()) {
        return Err(unauthorized());
    }
    run_batch(&ctx).await
}

/// POST entry point for administrative re-dispatch.
async fn run_manual(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> Result<Json<BatchReport>, (StatusCode, Json<ErrorResponse>)> {
    if bearer_token(&headers) != Some(ctx.trigger_secret.as_str()) {
        return Err(unauthorized());
    }
    run_batch(&ctx).await
}

async fn run_batch(ctx: &AppContext) -> Result<Json<BatchReport>, (StatusCode, Json<ErrorResponse>)> {
    runner::process_due(
        &ctx.pool,
        ctx.graph.as_ref(),
        ctx.filehost.as_ref(),
        ctx.storage.as_ref(),
        ctx.batch_cap,
    )
    .await
    .map(Json)
    .map_err(|err| {
        error!(?err, "batch run failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("{err:#}"),
            }),
        )
    })
}
