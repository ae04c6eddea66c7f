//! Per-backend JSON-RPC endpoints
//!
//! `POST /servers/:id/mcp` accepts any supported method; the
//! `/mcp/initialize`, `/mcp/tools/list` and `/mcp/tools/call` variants only
//! accept their own. Bodies are parsed here rather than by `Json` so that a
//! malformed body still gets a JSON-RPC error object back.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::{
    mcp::{Disposition, JsonRpcReply},
    state::AppState,
};

impl IntoResponse for JsonRpcReply {
    fn into_response(self) -> Response {
        let status = match self.disposition {
            Disposition::Ok => StatusCode::OK,
            Disposition::BadRequest => StatusCode::BAD_REQUEST,
            Disposition::NotFound => StatusCode::NOT_FOUND,
            Disposition::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.body)).into_response()
    }
}

/// Raw JSON-RPC body, whatever its content type
pub struct JsonRpcBody(pub Value);

#[async_trait]
impl<S> FromRequest<S> for JsonRpcBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;

        serde_json::from_slice(&bytes).map(JsonRpcBody).map_err(|e| {
            tracing::debug!(error = %e, "Unparseable JSON-RPC body");
            JsonRpcReply::parse_error().into_response()
        })
    }
}

pub async fn handle_mcp_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonRpcBody(body): JsonRpcBody,
) -> JsonRpcReply {
    state.translator.handle(&id, body).await
}

pub async fn initialize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonRpcBody(body): JsonRpcBody,
) -> JsonRpcReply {
    state.translator.handle_scoped(&id, "initialize", body).await
}

pub async fn tools_list(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonRpcBody(body): JsonRpcBody,
) -> JsonRpcReply {
    state.translator.handle_scoped(&id, "tools/list", body).await
}

pub async fn tools_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonRpcBody(body): JsonRpcBody,
) -> JsonRpcReply {
    state.translator.handle_scoped(&id, "tools/call", body).await
}
