//! HTTP server for entity question answering

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{ClearResult, ErrorKind, QueryOutcome, SharedOrchestrator};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub user_query: String,
}

#[derive(Debug, Deserialize)]
pub struct ClarifyParams {
    pub selection: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

async fn query_handler(
    State(orchestrator): State<SharedOrchestrator>,
    Query(params): Query<QueryParams>,
) -> Json<QueryOutcome> {
    Json(orchestrator.resolve_and_answer(&params.user_query).await)
}

async fn clarify_handler(
    State(orchestrator): State<SharedOrchestrator>,
    Query(params): Query<ClarifyParams>,
) -> Result<Json<QueryOutcome>, (StatusCode, Json<QueryOutcome>)> {
    let outcome = orchestrator.clarify(&params.selection).await;
    match &outcome {
        QueryOutcome::Error(err) if err.kind == ErrorKind::InvalidSelection => {
            Err((StatusCode::BAD_REQUEST, Json(outcome)))
        }
        _ => Ok(Json(outcome)),
    }
}

async fn clear_cache_handler(State(orchestrator): State<SharedOrchestrator>) -> Json<ClearResult> {
    Json(orchestrator.clear_all_cache().await)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "entityscope".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn create_router(orchestrator: SharedOrchestrator) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/query", get(query_handler))
        .route("/clarify", get(clarify_handler))
        .route("/clear-cache", post(clear_cache_handler))
        .with_state(orchestrator)
}

pub async fn run_server(orchestrator: SharedOrchestrator, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting entityscope server on {}", addr);

    let app = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
