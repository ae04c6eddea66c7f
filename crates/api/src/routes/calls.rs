//! REST tool invocation routes

use axum::{
    extract::{Path, State},
    Json,
};
use mcphub_shared::{BatchCallRequest, BatchCallResponse, CallRequest, CallResponse};

use crate::{
    error::{ApiError, ApiResult},
    mcp::ToolInvocationBody,
    state::AppState,
};

pub async fn call_tool(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Json<CallResponse> {
    Json(state.translator.call(request).await)
}

pub async fn call_server_tool(
    State(state): State<AppState>,
    Path((id, tool_name)): Path<(String, String)>,
    body: Option<Json<ToolInvocationBody>>,
) -> Json<CallResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    Json(state.translator.call_path(&id, &tool_name, body).await)
}

pub async fn batch_call(
    State(state): State<AppState>,
    Json(batch): Json<BatchCallRequest>,
) -> ApiResult<Json<BatchCallResponse>> {
    state
        .translator
        .batch(batch.requests)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::BadRequest("No requests provided".to_string()))
}
