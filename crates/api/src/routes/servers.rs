//! Backend status and management routes

use axum::{
    extract::{Path, State},
    Json,
};
use mcphub_shared::{BackendConfig, ConnectionStatus, Tool};
use serde_json::{json, Map, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Every backend status, in configuration order
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ConnectionStatus>> {
    Json(state.supervisor.all_statuses())
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConnectionStatus>> {
    state.supervisor.status(&id).map(Json).ok_or(ApiError::NotFound)
}

/// Store a backend config, then (re)connect it, or disconnect it when disabled
pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<BackendConfig>,
) -> ApiResult<Json<Value>> {
    let enabled = config.enabled;
    state.config_store.update_server(&id, config.clone());

    if !enabled {
        state.supervisor.remove(&id).await;
        tracing::info!(backend_id = %id, "Backend disabled");
        return Ok(Json(json!({ "success": true, "message": "Server disabled" })));
    }

    state.supervisor.start(&id, config).await;
    let status = state
        .supervisor
        .status(&id)
        .ok_or_else(|| ApiError::Internal(format!("Status for {} disappeared", id)))?;
    serde_json::to_value(status)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let stored = state.config_store.remove_server(&id);
    let live = state.supervisor.remove(&id).await;
    if !stored && !live {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true, "message": "Server removed successfully" })))
}

/// Reconnect a backend. Unknown or disabled ids are a silent no-op.
pub async fn refresh_server(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    if !state.supervisor.refresh(&id).await {
        tracing::debug!(backend_id = %id, "Refresh skipped for unknown or disabled backend");
    }
    Json(json!({ "success": true, "message": "Server refreshed successfully" }))
}

/// Cached tools of every backend, keyed by backend id
pub async fn list_all_tools(State(state): State<AppState>) -> Json<Map<String, Value>> {
    let tools = state
        .supervisor
        .all_statuses()
        .into_iter()
        .map(|s| (s.id, serde_json::to_value(s.tools).unwrap_or(Value::Array(Vec::new()))))
        .collect();
    Json(tools)
}

pub async fn list_server_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Tool>>> {
    state
        .supervisor
        .status(&id)
        .map(|s| Json(s.tools))
        .ok_or(ApiError::NotFound)
}
