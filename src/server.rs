//! HTTP API surface.
//!
//! Thin JSON endpoints over the same components the CLI uses:
//! `GET /health`, `POST /chat`, `POST /documents`, `GET /stats`.

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::chat::{ChatEngine, ChatRequest};
use crate::index::VectorIndex;
use crate::ingest::Ingestor;
use crate::store;

pub struct AppState {
    pub pool: SqlitePool,
    pub engine: ChatEngine,
    pub ingestor: Ingestor,
    pub index: VectorIndex,
    pub embedding_model: String,
}

struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/documents", post(add_document))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(anyhow::anyhow!("message must not be empty").into());
    }
    let outcome = state.engine.process_message(&request).await?;
    Ok(Json(serde_json::to_value(&outcome)?))
}

#[derive(Deserialize)]
struct AddDocumentRequest {
    filename: String,
    content: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    metadata: Option<Value>,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

async fn add_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddDocumentRequest>,
) -> Result<Json<Value>, ApiError> {
    let metadata = request.metadata.unwrap_or_else(|| json!({}));
    let doc_id = state
        .ingestor
        .ingest(&request.content, &request.filename, &request.content_type, metadata)
        .await?;
    Ok(Json(json!({ "document_id": doc_id })))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let store_stats = store::stats(&state.pool).await?;
    let chunk_count = state.index.count().await?;
    let files: Vec<String> = store::active_documents(&state.pool)
        .await?
        .into_iter()
        .map(|d| d.filename)
        .collect();
    Ok(Json(json!({
        "documents": store_stats.active_documents,
        "files": files,
        "chunks": chunk_count,
        "embedding_model": state.embedding_model,
        "users": store_stats.users,
        "conversations": store_stats.conversations,
        "messages": store_stats.messages,
        "categories": store_stats.categories,
    })))
}
