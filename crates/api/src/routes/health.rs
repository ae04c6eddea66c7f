//! Health, metrics and gateway info endpoints

use axum::{extract::State, http::StatusCode, Json};
use mcphub_shared::{ConnectionState, Metrics};
use serde::Serialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    /// Seconds since the process started
    pub uptime: f64,
    pub servers: ServerCounts,
}

#[derive(Serialize)]
pub struct ServerCounts {
    pub total: usize,
    pub connected: usize,
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let statuses = state.supervisor.all_statuses();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now_rfc3339(),
        uptime: state.started.elapsed().as_secs_f64(),
        servers: ServerCounts {
            total: statuses.len(),
            connected: statuses.iter().filter(|s| s.is_connected()).count(),
        },
    })
}

/// Liveness check (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: 503 until every enabled backend has left `connecting`
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    let starting = state
        .supervisor
        .all_statuses()
        .iter()
        .any(|s| s.status == ConnectionState::Connecting);

    if starting {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

pub async fn metrics(State(state): State<AppState>) -> Json<Metrics> {
    Json(state.metrics.snapshot())
}

/// Self-description of the gateway and its endpoints
pub async fn info(State(state): State<AppState>) -> Json<Value> {
    let proxy = state.proxy();
    let base = format!("http://{}:{}", proxy.host, proxy.port);

    Json(json!({
        "name": "McpHub",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "HTTP gateway for MCP servers with per-server MCP protocol support",
        "endpoints": {
            "health": "/api/health",
            "metrics": if proxy.enable_metrics { Some("/api/metrics") } else { None },
            "servers": "/api/servers",
            "tools": "/api/tools",
            "call": "/api/call",
            "batchCall": "/api/batch-call",
            "info": "/api/info"
        },
        "mcpProtocol": {
            "description": "Each server supports the MCP protocol directly",
            "endpoints": {
                "initialize": "POST /api/servers/:id/mcp/initialize",
                "toolsList": "POST /api/servers/:id/mcp/tools/list",
                "toolsCall": "POST /api/servers/:id/mcp/tools/call",
                "generic": "POST /api/servers/:id/mcp"
            },
            "example": {
                "initialize": {"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}},
                "toolsList": {"jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {}},
                "toolsCall": {
                    "jsonrpc": "2.0",
                    "id": 3,
                    "method": "tools/call",
                    "params": {"name": "list_directory", "arguments": {"path": "."}}
                }
            },
            "configuration": {
                "description": "Configure in your MCP client like this:",
                "example": {
                    "name": "Filesystem Server",
                    "description": "Filesystem server via HTTP gateway",
                    "type": "http",
                    "transport": {
                        "type": "http",
                        "url": format!("{}/api/servers/filesystem/mcp", base)
                    }
                }
            }
        },
        "limits": {
            "rateLimit": proxy.rate_limit,
            "requestTimeout": proxy.request_timeout,
            "maxRequestSize": proxy.max_request_size
        },
        "timestamp": now_rfc3339()
    }))
}
