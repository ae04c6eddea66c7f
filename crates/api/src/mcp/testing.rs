//! In-memory connector and sessions for exercising the gateway without
//! spawning processes or opening sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mcphub_shared::BackendConfig;
use serde_json::{json, Value};

use super::client::{McpClientError, McpConnector, McpResult, McpSession};
use super::transport::TransportDescriptor;
use super::types::McpTool;

pub fn tool(name: &str) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: Some(format!("{} tool", name)),
        input_schema: json!({"type": "object"}),
    }
}

/// A stdio backend config; the fake connector ignores the command
pub fn backend_config(name: &str) -> BackendConfig {
    serde_json::from_value(json!({
        "name": name,
        "description": format!("{} backend", name),
        "type": "stdio",
        "command": "fake-server",
        "args": ["--stdio"]
    }))
    .unwrap_or_else(|e| panic!("invalid test config: {}", e))
}

#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub tools: Vec<McpTool>,
    pub connect_error: Option<String>,
    pub list_error: Option<String>,
    /// Tools whose calls fail with a backend-reported error
    pub failing_tools: Vec<String>,
    /// Number of leading calls that fail with a transient timeout
    pub transient_failures: u32,
    pub call_delay: Option<Duration>,
}

impl FakeBehavior {
    pub fn with_tools(tools: Vec<McpTool>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    pub fn failing_connect(message: &str) -> Self {
        Self {
            connect_error: Some(message.to_string()),
            ..Self::default()
        }
    }
}

pub struct FakeSession {
    backend_id: String,
    behavior: FakeBehavior,
    transient_left: AtomicU32,
    pub calls: AtomicUsize,
    pub closes: AtomicUsize,
}

#[async_trait]
impl McpSession for FakeSession {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        match &self.behavior.list_error {
            Some(msg) => Err(McpClientError::McpError(msg.clone())),
            None => Ok(self.behavior.tools.clone()),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behavior.call_delay {
            tokio::time::sleep(delay).await;
        }

        let transient = self
            .transient_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(McpClientError::Timeout);
        }

        if self.behavior.failing_tools.iter().any(|t| t == name) {
            return Err(McpClientError::McpError(format!("Tool {} failed", name)));
        }

        Ok(json!([{
            "type": "text",
            "text": format!("{}/{}", self.backend_id, name),
            "arguments": arguments
        }]))
    }

    async fn list_resources(&self) -> McpResult<Value> {
        Ok(json!({"resources": [{"uri": "file:///tmp/a.txt", "name": "a.txt"}]}))
    }

    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        Ok(json!({"contents": [{"uri": uri, "text": "hello"}]}))
    }

    async fn list_prompts(&self) -> McpResult<Value> {
        Ok(json!({"prompts": [{"name": "summarize"}]}))
    }

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        Ok(json!({"name": name, "arguments": arguments}))
    }

    async fn close(&self) -> McpResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    sessions: Mutex<Vec<(String, Arc<FakeSession>)>>,
    connects: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Behavior applied to the next connections for `id`
    pub fn set(&self, id: &str, behavior: FakeBehavior) {
        if let Ok(mut behaviors) = self.behaviors.lock() {
            behaviors.insert(id.to_string(), behavior);
        }
    }

    /// Sessions opened for `id`, oldest first
    pub fn sessions(&self, id: &str) -> Vec<Arc<FakeSession>> {
        self.sessions
            .lock()
            .map(|s| {
                s.iter()
                    .filter(|(k, _)| k == id)
                    .map(|(_, v)| Arc::clone(v))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every connect attempt, in order
    pub fn connect_order(&self) -> Vec<String> {
        self.connects.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl McpConnector for FakeConnector {
    async fn connect(
        &self,
        backend_id: &str,
        _descriptor: &TransportDescriptor,
    ) -> McpResult<Arc<dyn McpSession>> {
        if let Ok(mut connects) = self.connects.lock() {
            connects.push(backend_id.to_string());
        }

        let behavior = self
            .behaviors
            .lock()
            .ok()
            .and_then(|b| b.get(backend_id).cloned())
            .unwrap_or_default();

        if let Some(msg) = &behavior.connect_error {
            return Err(McpClientError::ConnectionFailed(msg.clone()));
        }

        let session = Arc::new(FakeSession {
            backend_id: backend_id.to_string(),
            transient_left: AtomicU32::new(behavior.transient_failures),
            behavior,
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push((backend_id.to_string(), Arc::clone(&session)));
        }

        Ok(session)
    }
}
