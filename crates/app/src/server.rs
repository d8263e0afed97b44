//! HTTP gateway.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Chat turn, streamed as Server-Sent Events |
//! | `POST` | `/api/search` | One-shot retrieval |
//! | `POST` | `/api/tools/execute` | Dispatch a named tool |
//! | `GET`  | `/api/admin/stats` | Vector/graph/cache totals |
//! | `POST` | `/api/admin/rebuild` | Clear all three stores |
//! | `GET`  | `/health` | Liveness check |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::GatewayError;
use crate::orchestrator::ChatOrchestrator;
use crate::retrieval::{RetrievalEngine, RetrievalRequest};
use crate::tools::ToolRegistry;
use ragctl_core::models::{Message, Role};
use ragctl_core::store::{CacheStore, Filter, GraphStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub graph: Arc<dyn GraphStore>,
    pub cache: Arc<dyn CacheStore>,
    pub retrieval: Arc<RetrievalEngine>,
    pub tools: Arc<ToolRegistry>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/search", post(handle_search))
        .route("/api/tools/execute", post(handle_tools_execute))
        .route("/api/admin/stats", get(handle_admin_stats))
        .route("/api/admin/rebuild", post(handle_admin_rebuild))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state.clone());

    tracing::info!(bind = %bind_addr, "gateway listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<WireMessage>,
}

#[derive(Deserialize, Serialize, Clone)]
struct WireMessage {
    role: String,
    content: String,
}

fn to_message(w: &WireMessage) -> Message {
    Message {
        role: match w.role.as_str() {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        },
        content: w.content.clone(),
        citations: Vec::new(),
        tool_results: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let history: Vec<Message> = req.history.iter().map(to_message).collect();
    let turn = state.orchestrator.prepare_turn(&history, &req.message).await;
    let rx = state
        .orchestrator
        .stream_reply(&history, &req.message, &turn)
        .await?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| {
            let payload = serde_json::json!({ "delta": chunk.delta, "done": chunk.done });
            (Ok(Event::default().data(payload.to_string())), rx)
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ POST /api/search ============

#[derive(Deserialize)]
struct SearchApiRequest {
    query: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_rerank")]
    rerank: bool,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    filters: Option<Filter>,
}

fn default_mode() -> String {
    "hybrid".to_string()
}
fn default_limit() -> usize {
    10
}
fn default_rerank() -> bool {
    true
}
fn default_method() -> String {
    "standard".to_string()
}

#[derive(Serialize)]
struct SearchApiResponse {
    results: Vec<ragctl_core::search::SearchResultItem>,
    count: usize,
    query: String,
    method: String,
    mode: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchApiRequest>,
) -> Result<Json<SearchApiResponse>, GatewayError> {
    if req.query.trim().is_empty() {
        return Err(GatewayError::Validation {
            message: "query must not be empty".to_string(),
        });
    }

    let retrieval_req = RetrievalRequest {
        query: req.query.clone(),
        mode: req.mode.clone(),
        filter: req.filters.clone(),
        top_n: Some(req.limit),
        use_hyde: req.method == "hyde",
        use_multi_query: req.method == "multi",
        rerank: req.rerank,
    };

    let results = state
        .retrieval
        .retrieve(&retrieval_req)
        .await
        .map_err(|e| GatewayError::RemoteBadResponse {
            message: e.to_string(),
        })?;

    Ok(Json(SearchApiResponse {
        count: results.len(),
        results,
        query: req.query,
        method: req.method,
        mode: req.mode,
    }))
}

// ============ POST /api/tools/execute ============

#[derive(Deserialize)]
struct ToolExecuteRequest {
    tool: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ToolExecuteResponse {
    tool: String,
    data: serde_json::Value,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    formatted: Option<String>,
}

async fn handle_tools_execute(
    State(state): State<AppState>,
    Json(req): Json<ToolExecuteRequest>,
) -> Result<Json<ToolExecuteResponse>, GatewayError> {
    let parameters: BTreeMap<String, String> = req
        .parameters
        .into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect();

    let outcome = state.tools.dispatch_by_name(&req.tool, parameters).await?;

    Ok(Json(ToolExecuteResponse {
        tool: outcome.tool,
        data: outcome.data,
        success: outcome.success,
        error: outcome.error,
        formatted: None,
    }))
}

// ============ GET /api/admin/stats ============

#[derive(Serialize)]
struct AdminStatsResponse {
    #[serde(rename = "vectorDatabase")]
    vector_database: ragctl_core::store::VectorStoreStats,
    #[serde(rename = "knowledgeGraph")]
    knowledge_graph: ragctl_core::store::GraphStoreStats,
    cache: CacheStats,
    timestamp: String,
}

#[derive(Serialize)]
struct CacheStats {
    #[serde(rename = "totalKeys")]
    total_keys: u64,
}

async fn handle_admin_stats(
    State(state): State<AppState>,
) -> Result<Json<AdminStatsResponse>, GatewayError> {
    let vector_database = state.store.stats().await?;
    let knowledge_graph = state.graph.stats().await?;
    let total_keys = state.cache.total_keys().await?;

    Ok(Json(AdminStatsResponse {
        vector_database,
        knowledge_graph,
        cache: CacheStats { total_keys },
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

// ============ POST /api/admin/rebuild ============

#[derive(Serialize)]
struct AdminRebuildResponse {
    success: bool,
    message: String,
    timestamp: String,
}

async fn handle_admin_rebuild(
    State(state): State<AppState>,
) -> Result<Json<AdminRebuildResponse>, GatewayError> {
    state.store.reset_collection().await?;
    state.graph.reset().await?;
    state.cache.reset().await?;

    Ok(Json(AdminRebuildResponse {
        success: true,
        message: "all stores cleared".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
