//! API routes

pub mod calls;
pub mod health;
pub mod mcp_proxy;
pub mod resources;
pub mod servers;

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, OriginalUri},
    http::StatusCode,
    middleware,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{security::security_headers_middleware, state::AppState};

const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let proxy = state.proxy();

    let mut api_routes = Router::new()
        // Health and gateway info
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/info", get(health::info))
        // Backend status and management
        .route("/servers", get(servers::list_servers))
        .route(
            "/servers/:id",
            get(servers::get_server)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/servers/:id/refresh", post(servers::refresh_server))
        .route("/tools", get(servers::list_all_tools))
        .route("/servers/:id/tools", get(servers::list_server_tools))
        // REST tool calls
        .route("/call", post(calls::call_tool))
        .route("/servers/:id/tools/:tool_name", post(calls::call_server_tool))
        .route("/batch-call", post(calls::batch_call))
        // Per-backend JSON-RPC
        .route("/servers/:id/mcp", post(mcp_proxy::handle_mcp_request))
        .route("/servers/:id/mcp/initialize", post(mcp_proxy::initialize))
        .route("/servers/:id/mcp/tools/list", post(mcp_proxy::tools_list))
        .route("/servers/:id/mcp/tools/call", post(mcp_proxy::tools_call))
        // Resource and prompt passthroughs
        .route("/servers/:id/resources", get(resources::list_resources))
        .route("/servers/:id/resources/read", post(resources::read_resource))
        .route("/servers/:id/prompts", get(resources::list_prompts))
        .route("/servers/:id/prompts/:name", post(resources::get_prompt));

    if proxy.enable_metrics {
        api_routes = api_routes.route("/metrics", get(health::metrics));
    }

    let body_limit = proxy.max_request_bytes().unwrap_or_else(|e| {
        tracing::warn!(error = %e, limit = DEFAULT_BODY_LIMIT, "Invalid maxRequestSize, using default");
        DEFAULT_BODY_LIMIT
    });

    let mut router = Router::new()
        .route("/", get(|| async { Redirect::temporary("/api/info") }))
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(security_headers_middleware));

    if proxy.request_timeout > 0 {
        router = router.layer(TimeoutLayer::new(Duration::from_millis(proxy.request_timeout)));
    }
    if proxy.cors {
        router = router.layer(CorsLayer::permissive());
    }
    if proxy.enable_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    router.with_state(state)
}

async fn not_found(OriginalUri(uri): OriginalUri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "path": uri.path(),
            "availableEndpoints": "/api/info"
        })),
    )
}
