//! Common types used across McpHub

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::OffsetDateTime;

// =============================================================================
// Transport Kinds
// =============================================================================

/// Wire transport used to reach a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "websocket" => Ok(Self::WebSocket),
            _ => Err(format!("Invalid transport type: {}", s)),
        }
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Transport settings as they appear in the configuration document.
///
/// Only the fields of one variant are meaningful for a given backend; the
/// resolver decides which based on `kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    // stdio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,

    // http
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    // websocket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,

    // common
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
}

/// One backend entry of the configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportConfig>,
    /// Transport fields written at the top level by older documents
    #[serde(flatten)]
    pub legacy: TransportConfig,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    /// The transport block the resolver should read: the explicit one when
    /// present, the legacy top-level fields otherwise.
    pub fn effective_transport(&self) -> &TransportConfig {
        self.transport.as_ref().unwrap_or(&self.legacy)
    }

    /// Transport kind as written: `transport.type` wins over the backend `type`.
    pub fn effective_kind(&self) -> &str {
        self.transport
            .as_ref()
            .and_then(|t| t.kind.as_deref())
            .unwrap_or(&self.kind)
    }
}

/// Backend configs keyed by id, iterated in document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendMap {
    entries: Vec<(String, BackendConfig)>,
}

impl BackendMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&BackendConfig> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replaces an existing entry in place, or appends a new one.
    pub fn insert(&mut self, id: impl Into<String>, config: BackendConfig) -> Option<BackendConfig> {
        let id = id.into();
        match self.entries.iter_mut().find(|(k, _)| *k == id) {
            Some((_, slot)) => Some(std::mem::replace(slot, config)),
            None => {
                self.entries.push((id, config));
                None
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<BackendConfig> {
        let pos = self.entries.iter().position(|(k, _)| k == id)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BackendConfig)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, BackendConfig)> for BackendMap {
    fn from_iter<I: IntoIterator<Item = (String, BackendConfig)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (id, config) in iter {
            map.insert(id, config);
        }
        map
    }
}

impl Serialize for BackendMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, config) in &self.entries {
            map.serialize_entry(id, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BackendMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BackendMapVisitor;

        impl<'de> Visitor<'de> for BackendMapVisitor {
            type Value = BackendMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of backend id to backend configuration")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<BackendMap, A::Error> {
                let mut map = BackendMap::new();
                while let Some((id, config)) = access.next_entry::<String, BackendConfig>()? {
                    map.insert(id, config);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(BackendMapVisitor)
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Lifecycle state of a backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub transport_kind: String,
    pub endpoint: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub connected_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
}

/// A tool advertised by a backend, captured at discovery time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    pub backend_id: String,
}

/// Externally visible state of one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub status: ConnectionState,
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub connection_info: ConnectionInfo,
}

impl ConnectionStatus {
    /// Fresh status for a backend that is about to be connected
    pub fn connecting(id: &str, config: &BackendConfig, endpoint: String) -> Self {
        Self {
            id: id.to_string(),
            name: config.name.clone(),
            description: config.description.clone(),
            kind: config.kind.clone(),
            enabled: config.enabled,
            status: ConnectionState::Connecting,
            tools: Vec::new(),
            error: None,
            connection_info: ConnectionInfo {
                transport_kind: config.effective_kind().to_string(),
                endpoint,
                connected_at: None,
                last_activity: None,
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionState::Connected
    }
}

// =============================================================================
// Tool Calls
// =============================================================================

/// A tool invocation addressed to one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(alias = "serverId")]
    pub backend_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Per-call deadline in milliseconds
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
}

impl CallRequest {
    pub fn new(backend_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            tool_name: tool_name.into(),
            arguments: serde_json::Map::new(),
            request_id: None,
            timeout_ms: None,
            retry_attempts: None,
        }
    }

    pub fn with_arguments(mut self, arguments: serde_json::Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Outcome of a tool invocation; produced for every call, never raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponse {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub backend_id: String,
    pub tool_name: String,
    pub execution_time_ms: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl CallResponse {
    pub fn success(request: &CallRequest, data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data,
            error: None,
            request_id: request.request_id.clone(),
            backend_id: request.backend_id.clone(),
            tool_name: request.tool_name.clone(),
            execution_time_ms,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn failure(request: &CallRequest, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            request_id: request.request_id.clone(),
            backend_id: request.backend_id.clone(),
            tool_name: request.tool_name.clone(),
            execution_time_ms,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchCallRequest {
    #[serde(default)]
    pub requests: Vec<CallRequest>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCallResponse {
    pub success: bool,
    pub results: Vec<CallResponse>,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
}

impl BatchCallResponse {
    pub fn from_results(results: Vec<CallResponse>) -> Self {
        let successful_requests = results.iter().filter(|r| r.success).count();
        Self {
            success: true,
            total_requests: results.len(),
            successful_requests,
            failed_requests: results.len() - successful_requests,
            results,
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStats {
    pub requests: u64,
    pub errors: u64,
    pub average_time_ms: f64,
}

/// Point-in-time copy of gateway counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub server_stats: BTreeMap<String, BackendStats>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // BackendConfig Tests
    // =========================================================================

    #[test]
    fn test_backend_config_legacy_fields() {
        let config: BackendConfig = serde_json::from_value(json!({
            "name": "Files",
            "type": "stdio",
            "command": "npx",
            "args": ["-y", "server-filesystem"],
            "workingDir": "/tmp"
        }))
        .unwrap();

        assert!(config.enabled);
        assert!(config.transport.is_none());
        assert_eq!(config.effective_kind(), "stdio");
        assert_eq!(config.effective_transport().command.as_deref(), Some("npx"));
        assert_eq!(config.effective_transport().working_dir.as_deref(), Some("/tmp"));
        assert!(config.legacy.kind.is_none());
    }

    #[test]
    fn test_backend_config_transport_type_wins() {
        let config: BackendConfig = serde_json::from_value(json!({
            "name": "Remote",
            "type": "stdio",
            "enabled": false,
            "transport": { "type": "http", "url": "http://localhost:9000/mcp" }
        }))
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.effective_kind(), "http");
        assert_eq!(
            config.effective_transport().url.as_deref(),
            Some("http://localhost:9000/mcp")
        );
    }

    #[test]
    fn test_backend_map_preserves_document_order() {
        let map: BackendMap = serde_json::from_str(
            r#"{
                "zeta": {"name": "Z", "type": "stdio", "command": "z"},
                "alpha": {"name": "A", "type": "stdio", "command": "a"},
                "mid": {"name": "M", "type": "stdio", "command": "m"}
            }"#,
        )
        .unwrap();

        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);

        let out = serde_json::to_string(&map).unwrap();
        let zeta = out.find("zeta").unwrap();
        let alpha = out.find("alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_backend_map_insert_replaces_in_place() {
        let base: BackendConfig = serde_json::from_value(json!({
            "name": "A", "type": "stdio", "command": "a"
        }))
        .unwrap();
        let mut map = BackendMap::new();
        map.insert("a", base.clone());
        map.insert("b", base.clone());

        let mut renamed = base;
        renamed.name = "Renamed".to_string();
        assert!(map.insert("a", renamed).is_some());

        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(map.get("a").unwrap().name, "Renamed");
        assert!(map.remove("a").is_some());
        assert_eq!(map.len(), 1);
    }

    // =========================================================================
    // Call Envelope Tests
    // =========================================================================

    #[test]
    fn test_call_request_accepts_legacy_aliases() {
        let req: CallRequest = serde_json::from_value(json!({
            "serverId": "fs",
            "toolName": "read_file",
            "arguments": {"path": "/etc/hosts"},
            "timeout": 2500
        }))
        .unwrap();

        assert_eq!(req.backend_id, "fs");
        assert_eq!(req.timeout_ms, Some(2500));
        assert_eq!(req.arguments["path"], "/etc/hosts");
    }

    #[test]
    fn test_call_response_failure_shape() {
        let req = CallRequest::new("fs", "read_file");
        let resp = CallResponse::failure(&req, "boom", 0);
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["data"], Value::Null);
        assert_eq!(value["error"], "boom");
        assert_eq!(value["backendId"], "fs");
        assert_eq!(value["executionTimeMs"], 0);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_batch_response_counts() {
        let req = CallRequest::new("fs", "t");
        let batch = BatchCallResponse::from_results(vec![
            CallResponse::success(&req, json!([]), 3),
            CallResponse::failure(&req, "x", 1),
            CallResponse::success(&req, json!([]), 2),
        ]);

        assert_eq!(batch.total_requests, 3);
        assert_eq!(batch.successful_requests, 2);
        assert_eq!(batch.failed_requests, 1);
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("WebSocket".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert!("grpc".parse::<TransportKind>().is_err());
    }
}
