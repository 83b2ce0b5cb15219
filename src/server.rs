//! HTTP server for the context service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/realtime-rag` | Low-latency chat context for a query (cached, coalesced) |
//! | `GET`  | `/api/realtime-rag` | Endpoint health check |
//! | `GET`  | `/tools/list` | List registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a registered tool by name |
//! | `GET`  | `/health` | Service health (version + per-upstream status) |
//!
//! # Error Contract
//!
//! Tool-call errors follow:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `tool_error` (500).
//!
//! The realtime endpoint never returns a retrieval error: an upstream outage
//! yields a `200` with the configured fallback context and an `error` note,
//! so voice conversations keep flowing.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! voice clients.

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::app::Services;
use crate::cache::{rag_cache_key, Cache};
use crate::chunk_store::ChunkStore;
use crate::config::Config;
use crate::dedupe::Dedupe;
use crate::models::{ChatContext, SearchResult};
use crate::retrieve::Retriever;
use crate::tools::{ToolContext, ToolInfo, ToolRegistry};

/// Context served for queries too short to search on.
const SHORT_QUERY_CONTEXT: &str = "General professional background context available.";

/// How many compact sources the realtime endpoint returns.
const REALTIME_SOURCE_LIMIT: usize = 3;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    tool_ctx: Arc<ToolContext>,
    retriever: Arc<Retriever>,
    cache: Cache,
    dedupe: Arc<Dedupe<ChatContext>>,
    chunks: Option<Arc<dyn ChunkStore>>,
    vector_configured: bool,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    run_server_with_services(config, services).await
}

/// Starts the HTTP server with a pre-built service graph (used by tests and
/// custom binaries).
pub async fn run_server_with_services(
    config: &Config,
    services: Services,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        tools: Arc::new(ToolRegistry::with_builtins()),
        tool_ctx: Arc::new(ToolContext::new(
            services.retriever.clone(),
            services.composer.clone(),
        )),
        retriever: services.retriever,
        cache: services.cache,
        dedupe: Arc::new(Dedupe::new()),
        chunks: services.chunks,
        vector_configured: services.vector_configured,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route(
            "/api/realtime-rag",
            post(handle_realtime_context).get(handle_realtime_health),
        )
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("context service listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
    }
}

/// Map tool execution errors to the most appropriate HTTP status, so
/// built-in tools can signal client errors without a custom error type in
/// the `Tool` trait.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        not_found(format!("{}: {}", tool_name, msg))
    } else if msg.contains("must not be empty") || msg.contains("invalid") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else if msg.contains("timed out") {
        timeout_error(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ POST /api/realtime-rag ============

#[derive(Deserialize)]
struct ContextRequest {
    query: String,
}

/// Compact source reference for voice responses.
#[derive(Serialize)]
struct CompactSource {
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    score: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextResponse {
    context: String,
    sources: Vec<CompactSource>,
    relevance_score: f64,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn short_query_response() -> ContextResponse {
    ContextResponse {
        context: SHORT_QUERY_CONTEXT.to_string(),
        sources: Vec::new(),
        relevance_score: 0.0,
        cached: false,
        error: None,
    }
}

fn compact_sources(sources: &[SearchResult]) -> Vec<CompactSource> {
    sources
        .iter()
        .take(REALTIME_SOURCE_LIMIT)
        .map(|s| CompactSource {
            id: s.id.clone(),
            kind: s.metadata.chunk_type.clone(),
            score: s.score,
        })
        .collect()
}

/// Handler for `POST /api/realtime-rag`.
///
/// Low-latency context lookup for voice conversations: cache-aside with the
/// configured TTL, concurrent identical queries coalesced into one upstream
/// fetch, and a fallback context instead of an error on outage.
async fn handle_realtime_context(
    State(state): State<AppState>,
    payload: Result<Json<ContextRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) =
        payload.map_err(|_| bad_request("Query is required and must be a string"))?;

    let query = request.query.trim().to_string();
    if query.chars().count() < 2 {
        return Ok(Json(short_query_response()).into_response());
    }

    let key = rag_cache_key(&query);
    let ttl = state.config.cache.ttl_secs;

    let result = {
        let dedupe = state.dedupe.clone();
        let retriever = state.retriever.clone();
        let inner_key = key.clone();
        state
            .cache
            .get_or_compute(&key, ttl, move || async move {
                dedupe
                    .run(&inner_key, || async move {
                        retriever.try_chat_context(&query).await
                    })
                    .await
            })
            .await
    };

    match result {
        Ok((context, cached)) => {
            let body = ContextResponse {
                sources: compact_sources(&context.sources),
                context: context.context,
                relevance_score: context.relevance_score,
                cached,
                error: None,
            };
            let cache_control = format!(
                "public, s-maxage={}, stale-while-revalidate={}",
                ttl,
                ttl * 2
            );
            Ok((
                [
                    ("cache-control", cache_control.clone()),
                    ("cdn-cache-control", cache_control),
                ],
                Json(body),
            )
                .into_response())
        }
        Err(e) => {
            warn!(error = %e, "realtime context degraded to fallback");
            let fallback = state.retriever.fallback_context();
            let body = ContextResponse {
                context: fallback.context,
                sources: Vec::new(),
                relevance_score: fallback.relevance_score,
                cached: false,
                error: Some("Using fallback context".to_string()),
            };
            Ok(Json(body).into_response())
        }
    }
}

// ============ GET /api/realtime-rag ============

#[derive(Serialize)]
struct EndpointHealthResponse {
    status: String,
    endpoint: String,
    description: String,
}

/// Handler for `GET /api/realtime-rag`.
async fn handle_realtime_health() -> Json<EndpointHealthResponse> {
    Json(EndpointHealthResponse {
        status: "ok".to_string(),
        endpoint: "realtime-rag".to_string(),
        description: "Fast context retrieval for realtime voice conversations".to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

/// Handler for `GET /tools/list`.
async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();

    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Handler for `POST /tools/{name}`.
///
/// Returns `404` if the tool is not found, `400` for parameter validation
/// errors, and `500` for execution errors.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let result = tool
        .execute(params, &state.tool_ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct ServiceHealth {
    vector: bool,
    cache: bool,
    database: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    services: ServiceHealth,
}

/// Handler for `GET /health`.
///
/// Reports per-upstream reachability without ever failing the request; a
/// degraded upstream is information, not an error.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.chunks {
        Some(chunks) => chunks.ping().await.is_ok(),
        None => false,
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceHealth {
            vector: state.vector_configured,
            cache: state.cache.ping().await.is_ok(),
            database,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    #[test]
    fn short_query_response_shape() {
        let response = short_query_response();
        assert_eq!(response.context, SHORT_QUERY_CONTEXT);
        assert!(response.sources.is_empty());
        assert!(!response.cached);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["relevanceScore"], 0.0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn compact_sources_are_capped_at_three() {
        let sources: Vec<SearchResult> = (0..5)
            .map(|i| SearchResult {
                id: format!("c{}", i),
                score: 0.9 - i as f64 * 0.05,
                metadata: ChunkMetadata {
                    chunk_type: Some("experience".to_string()),
                    ..Default::default()
                },
                content: String::new(),
            })
            .collect();

        let compact = compact_sources(&sources);
        assert_eq!(compact.len(), 3);
        assert_eq!(compact[0].id, "c0");
        assert_eq!(compact[0].kind.as_deref(), Some("experience"));
    }

    #[test]
    fn tool_errors_map_to_status_codes() {
        let e = classify_tool_error("search", anyhow::anyhow!("query must not be empty"));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = classify_tool_error("chat", anyhow::anyhow!("invalid history: bad role"));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = classify_tool_error("get", anyhow::anyhow!("document not found"));
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e = classify_tool_error("search", anyhow::anyhow!("request timed out"));
        assert_eq!(e.status, StatusCode::REQUEST_TIMEOUT);

        let e = classify_tool_error("chat", anyhow::anyhow!("boom"));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.code, "tool_error");
    }
}
