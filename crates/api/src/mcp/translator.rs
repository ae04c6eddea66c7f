//! Protocol Translator
//!
//! Shapes the two public façades onto the supervisor and gateway:
//! the REST convenience calls and the per-backend JSON-RPC endpoint.

use std::sync::Arc;

use mcphub_shared::{BatchCallResponse, CallRequest, CallResponse};
use serde::Deserialize;
use serde_json::{json, Value};

use super::gateway::ToolInvocationGateway;
use super::supervisor::ConnectionSupervisor;
use super::types::{
    Capabilities, Implementation, InitializeResult, JsonRpcError, JsonRpcId, JsonRpcResponse,
    McpTool, PROTOCOL_VERSION,
};

/// How the HTTP layer should report a JSON-RPC reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ok,
    BadRequest,
    NotFound,
    Internal,
}

#[derive(Debug, Clone)]
pub struct JsonRpcReply {
    pub disposition: Disposition,
    pub body: JsonRpcResponse,
}

impl JsonRpcReply {
    fn ok(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            disposition: Disposition::Ok,
            body: JsonRpcResponse::success(id, result),
        }
    }

    fn error(disposition: Disposition, id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            disposition,
            body: JsonRpcResponse::error(id, error),
        }
    }

    /// Reply for a body that is not JSON at all
    pub fn parse_error() -> Self {
        Self::error(Disposition::BadRequest, None, JsonRpcError::parse_error())
    }
}

/// Body accepted by `POST /servers/:id/tools/:toolName`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationBody {
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
}

/// A JSON-RPC envelope that passed basic validation
struct Envelope {
    id: Option<JsonRpcId>,
    method: String,
    params: Option<Value>,
}

#[derive(Clone)]
pub struct ProtocolTranslator {
    supervisor: Arc<ConnectionSupervisor>,
    gateway: ToolInvocationGateway,
}

impl ProtocolTranslator {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, gateway: ToolInvocationGateway) -> Self {
        Self {
            supervisor,
            gateway,
        }
    }

    // =========================================================================
    // REST façade
    // =========================================================================

    pub async fn call(&self, request: CallRequest) -> CallResponse {
        self.gateway.dispatch(request).await
    }

    pub async fn call_path(
        &self,
        backend_id: &str,
        tool_name: &str,
        body: ToolInvocationBody,
    ) -> CallResponse {
        let request = CallRequest {
            backend_id: backend_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: body.arguments,
            request_id: body.request_id,
            timeout_ms: body.timeout_ms,
            retry_attempts: body.retry_attempts,
        };
        self.gateway.dispatch(request).await
    }

    /// `None` when the batch is empty
    pub async fn batch(&self, requests: Vec<CallRequest>) -> Option<BatchCallResponse> {
        if requests.is_empty() {
            return None;
        }
        Some(self.gateway.call_batch(requests).await)
    }

    // =========================================================================
    // JSON-RPC façade
    // =========================================================================

    /// Handle any supported method addressed to one backend
    pub async fn handle(&self, backend_id: &str, body: Value) -> JsonRpcReply {
        match parse_envelope(&body) {
            Ok(envelope) => self.route(backend_id, envelope).await,
            Err(id) => JsonRpcReply::error(Disposition::BadRequest, id, JsonRpcError::invalid_request()),
        }
    }

    /// Like [`handle`](Self::handle), but the body must carry `expected_method`
    pub async fn handle_scoped(&self, backend_id: &str, expected_method: &str, body: Value) -> JsonRpcReply {
        match parse_envelope(&body) {
            Ok(envelope) if envelope.method == expected_method => self.route(backend_id, envelope).await,
            Ok(envelope) => JsonRpcReply::error(
                Disposition::BadRequest,
                envelope.id,
                JsonRpcError::invalid_request(),
            ),
            Err(id) => JsonRpcReply::error(Disposition::BadRequest, id, JsonRpcError::invalid_request()),
        }
    }

    async fn route(&self, backend_id: &str, envelope: Envelope) -> JsonRpcReply {
        let Envelope { id, method, params } = envelope;

        let Some(status) = self.supervisor.status(backend_id) else {
            return JsonRpcReply::error(Disposition::NotFound, id, JsonRpcError::server_not_found());
        };

        match method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: Capabilities::tools_only(),
                    server_info: Implementation {
                        name: status.name,
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcReply::ok(id, value),
                    Err(e) => internal(id, e.to_string()),
                }
            }
            "tools/list" => {
                let tools: Vec<McpTool> = status
                    .tools
                    .into_iter()
                    .map(|t| McpTool {
                        name: t.name,
                        description: Some(t.description),
                        input_schema: t.input_schema,
                    })
                    .collect();
                JsonRpcReply::ok(id, json!({ "tools": tools }))
            }
            "tools/call" => self.tools_call(backend_id, id, params).await,
            other => {
                tracing::debug!(backend_id = %backend_id, method = %other, "Unsupported JSON-RPC method");
                JsonRpcReply::error(Disposition::BadRequest, id, JsonRpcError::method_not_found())
            }
        }
    }

    async fn tools_call(&self, backend_id: &str, id: Option<JsonRpcId>, params: Option<Value>) -> JsonRpcReply {
        let params = params.unwrap_or(Value::Null);
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcReply::error(Disposition::BadRequest, id, JsonRpcError::invalid_params());
        };
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return JsonRpcReply::error(Disposition::BadRequest, id, JsonRpcError::invalid_params())
            }
        };

        let request = CallRequest::new(backend_id, name).with_arguments(arguments);
        let response = self.gateway.dispatch(request).await;

        if response.success {
            JsonRpcReply::ok(id, json!({ "content": response.data }))
        } else {
            let message = response
                .error
                .unwrap_or_else(|| "Tool call failed".to_string());
            JsonRpcReply::error(Disposition::Internal, id, JsonRpcError::call_failed(message))
        }
    }
}

fn internal(id: Option<JsonRpcId>, detail: String) -> JsonRpcReply {
    tracing::error!(error = %detail, "Internal error handling JSON-RPC request");
    JsonRpcReply::error(Disposition::Internal, id, JsonRpcError::internal_error(detail))
}

/// Validate the JSON-RPC envelope. On failure returns whatever id could be
/// salvaged so the error can still be correlated.
fn parse_envelope(body: &Value) -> Result<Envelope, Option<JsonRpcId>> {
    let id = body
        .get("id")
        .and_then(|v| serde_json::from_value::<JsonRpcId>(v.clone()).ok());

    let Some(object) = body.as_object() else {
        return Err(None);
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(id);
    }

    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return Err(id);
    };

    Ok(Envelope {
        id,
        method: method.to_string(),
        params: object.get("params").cloned(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mcp::metrics::MetricsAggregator;
    use crate::mcp::testing::{backend_config, tool, FakeBehavior, FakeConnector};

    async fn translator(connector: &Arc<FakeConnector>) -> ProtocolTranslator {
        let metrics = Arc::new(MetricsAggregator::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(connector.clone(), metrics.clone()));
        supervisor.start("fs", backend_config("Filesystem")).await;
        let gateway = ToolInvocationGateway::new(supervisor.clone(), metrics);
        ProtocolTranslator::new(supervisor, gateway)
    }

    fn error_code(reply: &JsonRpcReply) -> i32 {
        reply.body.error.as_ref().unwrap().code
    }

    #[tokio::test]
    async fn test_tools_list_round_trip() {
        let connector = FakeConnector::new();
        connector.set("fs", FakeBehavior::with_tools(vec![tool("read_file"), tool("write_file")]));
        let translator = translator(&connector).await;

        let reply = translator
            .handle("fs", json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list", "params": {}}))
            .await;

        assert_eq!(reply.disposition, Disposition::Ok);
        assert_eq!(reply.body.id, Some(JsonRpcId::Number(7)));
        let tools = reply.body.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 2);
        assert_eq!(tools[0]["name"], "read_file");
        assert_eq!(tools[0]["inputSchema"], json!({"type": "object"}));
        assert!(tools[0].get("backendId").is_none());
    }

    #[tokio::test]
    async fn test_unknown_backend_is_server_not_found() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        let reply = translator
            .handle("ghost", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await;

        assert_eq!(reply.disposition, Disposition::NotFound);
        assert_eq!(error_code(&reply), JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(reply.body.error.unwrap().message, "Server not found");
    }

    #[tokio::test]
    async fn test_initialize_reports_backend_name() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        let reply = translator
            .handle_scoped("fs", "initialize", json!({"jsonrpc": "2.0", "id": "a", "method": "initialize"}))
            .await;

        let result = reply.body.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["capabilities"], json!({"tools": {}}));
        assert_eq!(result["serverInfo"]["name"], "Filesystem");
        assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_invalid_requests() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        for body in [
            json!([1, 2, 3]),
            json!({"jsonrpc": "1.0", "id": 1, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "method": 42}),
        ] {
            let reply = translator.handle("fs", body).await;
            assert_eq!(reply.disposition, Disposition::BadRequest);
            assert_eq!(error_code(&reply), JsonRpcError::INVALID_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_scoped_endpoint_rejects_other_methods() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        let reply = translator
            .handle_scoped("fs", "tools/call", json!({"jsonrpc": "2.0", "id": 3, "method": "tools/list"}))
            .await;

        assert_eq!(reply.disposition, Disposition::BadRequest);
        assert_eq!(error_code(&reply), JsonRpcError::INVALID_REQUEST);
        assert_eq!(reply.body.id, Some(JsonRpcId::Number(3)));
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        let reply = translator
            .handle("fs", json!({"jsonrpc": "2.0", "id": 1, "method": "sampling/createMessage"}))
            .await;

        assert_eq!(reply.disposition, Disposition::BadRequest);
        assert_eq!(error_code(&reply), JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(reply.body.error.unwrap().message, "Method not found");
    }

    #[tokio::test]
    async fn test_tools_call_success_and_failure() {
        let connector = FakeConnector::new();
        connector.set(
            "fs",
            FakeBehavior {
                failing_tools: vec!["explode".into()],
                ..FakeBehavior::default()
            },
        );
        let translator = translator(&connector).await;

        let ok = translator
            .handle(
                "fs",
                json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                       "params": {"name": "read_file", "arguments": {"path": "a"}}}),
            )
            .await;
        assert_eq!(ok.disposition, Disposition::Ok);
        assert_eq!(ok.body.result.unwrap()["content"][0]["text"], "fs/read_file");

        let failed = translator
            .handle(
                "fs",
                json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "explode"}}),
            )
            .await;
        assert_eq!(failed.disposition, Disposition::Internal);
        let error = failed.body.error.unwrap();
        assert_eq!(error.code, JsonRpcError::INTERNAL_ERROR);
        assert_eq!(error.message, "MCP server returned error: Tool explode failed");
    }

    #[tokio::test]
    async fn test_tools_call_without_name_is_invalid_params() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        let reply = translator
            .handle("fs", json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {}}))
            .await;

        assert_eq!(reply.disposition, Disposition::BadRequest);
        assert_eq!(error_code(&reply), JsonRpcError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_rest_batch_rejects_empty() {
        let connector = FakeConnector::new();
        let translator = translator(&connector).await;

        assert!(translator.batch(Vec::new()).await.is_none());

        let resp = translator
            .call_path("fs", "read_file", ToolInvocationBody::default())
            .await;
        assert!(resp.success);
        assert_eq!(resp.backend_id, "fs");
    }
}
