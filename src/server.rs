//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Liveness message |
//! | `GET`  | `/health` | Version and number of indexed chunks |
//! | `GET`  | `/pdfs` | Documents currently in the corpus |
//! | `POST` | `/ingest` | Run a full rebuild, returns the ingestion report |
//! | `POST` | `/query` | Raw retrieval hits for `{query, top_k?}` |
//! | `POST` | `/chat` | Grounded answer for `{message, model?, top_k?}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). Retrieval and
//! generation failures are not errors at this layer: `/query` degrades to
//! `[]` (a blank query included) and `/chat` reports the failure in its
//! `answer`.

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::chat::{ChatResponse, ChatService};
use crate::config::{Config, ServerConfig};
use crate::context::RagContext;
use crate::index::IndexHandle;
use crate::ingest::IngestionCoordinator;
use crate::models::{IngestionReport, QueryResult};
use crate::retrieve::RetrievalEngine;
use crate::source::{DirectorySource, DocumentSource};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    source: Arc<DirectorySource>,
    handle: Arc<IndexHandle>,
    coordinator: Arc<IngestionCoordinator>,
    engine: Arc<RetrievalEngine>,
    chat: Arc<ChatService>,
}

impl AppState {
    fn from_context(ctx: &RagContext) -> Self {
        Self {
            config: ctx.config.clone(),
            source: ctx.source.clone(),
            handle: ctx.handle.clone(),
            coordinator: ctx.coordinator.clone(),
            engine: ctx.engine.clone(),
            chat: ctx.chat.clone(),
        }
    }
}

/// Router over the context's shared components, with the configured CORS
/// policy applied.
pub fn router(ctx: &RagContext) -> Router {
    let state = AppState::from_context(ctx);
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/pdfs", get(handle_list_pdfs))
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C, binding to `[server].bind`.
pub async fn run_server(ctx: &RagContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", bind_addr);
    println!("RAG server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    Ok(())
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    status: &'static str,
    message: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "ok",
        message: "PDF RAG API is running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    indexed_chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let indexed_chunks = state.handle.current().map(|i| i.len()).unwrap_or(0);
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_chunks,
    })
}

// ============ GET /pdfs ============

#[derive(Serialize)]
struct PdfListResponse {
    pdfs: Vec<String>,
    count: usize,
}

async fn handle_list_pdfs(State(state): State<AppState>) -> Result<Json<PdfListResponse>, AppError> {
    let pdfs = state
        .source
        .list()
        .map_err(|e| internal(format!("failed to list corpus: {:#}", e)))?;
    Ok(Json(PdfListResponse {
        count: pdfs.len(),
        pdfs,
    }))
}

// ============ POST /ingest ============

async fn handle_ingest(State(state): State<AppState>) -> Json<IngestionReport> {
    Json(state.coordinator.run().await)
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Json<Vec<QueryResult>> {
    let top_k = req.top_k.unwrap_or(state.config.retrieval.top_k);
    Json(state.engine.query(&req.query, top_k).await)
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    model: Option<String>,
    top_k: Option<usize>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.config.retrieval.top_k);
    let response = state
        .chat
        .answer(&req.message, top_k, req.model.as_deref())
        .await;
    Ok(Json(response))
}
