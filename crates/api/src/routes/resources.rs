//! Resource and prompt passthroughs

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ReadResourceBody {
    pub uri: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetPromptBody {
    #[serde(default)]
    pub arguments: Option<Value>,
}

pub async fn list_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.supervisor.list_resources(&id).await?))
}

pub async fn read_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReadResourceBody>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.supervisor.read_resource(&id, &body.uri).await?))
}

pub async fn list_prompts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.supervisor.list_prompts(&id).await?))
}

pub async fn get_prompt(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    body: Option<Json<GetPromptBody>>,
) -> ApiResult<Json<Value>> {
    let arguments = body.and_then(|Json(b)| b.arguments);
    Ok(Json(state.supervisor.get_prompt(&id, &name, arguments).await?))
}
