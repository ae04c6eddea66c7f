//! MCP Client for Backend Connections
//!
//! [`McpConnector`] and [`McpSession`] are the seam between the supervisor and
//! the wire. [`McpClientConnector`] is the production connector: it opens a
//! stdio, HTTP or WebSocket channel, performs the initialize handshake and
//! hands back an [`McpClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::http::HttpChannel;
use super::stdio::StdioChannel;
use super::transport::{ChannelSpec, TransportDescriptor};
use super::types::*;
use super::websocket::WebSocketChannel;

/// Timeout for the initialize handshake
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for MCP client operations
#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {0} from server")]
    HttpStatus(u16),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("MCP server returned error: {0}")]
    McpError(String),

    #[error("Server is not connected")]
    NotConnected,

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error("Process spawn failed: {0}")]
    ProcessError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl McpClientError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            // Retry network-related errors and timeouts
            McpClientError::HttpError(_) => true,
            McpClientError::HttpStatus(status) => *status >= 500 || *status == 429,
            McpClientError::Timeout => true,
            McpClientError::IoError(_) => true,

            // Don't retry permanent errors
            McpClientError::McpError(_) => false,
            McpClientError::NotConnected => false,
            McpClientError::InvalidResponse => false,
            McpClientError::ProcessError(_) => false,
            McpClientError::ConnectionFailed(_) => false,
            McpClientError::ConnectionClosed => false,
            McpClientError::JsonError(_) => false,
        }
    }
}

/// Result type for MCP client operations
pub type McpResult<T> = Result<T, McpClientError>;

// =============================================================================
// Client Contract
// =============================================================================

/// A live, initialized connection to one backend
#[async_trait]
pub trait McpSession: Send + Sync {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>>;

    /// Invoke a tool and return its `content` untouched
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value>;

    async fn list_resources(&self) -> McpResult<Value>;

    async fn read_resource(&self, uri: &str) -> McpResult<Value>;

    async fn list_prompts(&self) -> McpResult<Value>;

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value>;

    async fn close(&self) -> McpResult<()>;
}

/// Opens sessions from resolved transport descriptors
#[async_trait]
pub trait McpConnector: Send + Sync {
    async fn connect(
        &self,
        backend_id: &str,
        descriptor: &TransportDescriptor,
    ) -> McpResult<Arc<dyn McpSession>>;
}

// =============================================================================
// Concrete Client
// =============================================================================

enum Channel {
    Stdio(StdioChannel),
    Http(HttpChannel),
    WebSocket(WebSocketChannel),
}

impl Channel {
    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<JsonRpcResponse> {
        match self {
            Channel::Stdio(c) => c.request(method, params).await,
            Channel::Http(c) => c.request(method, params).await,
            Channel::WebSocket(c) => c.request(method, params).await,
        }
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        match self {
            Channel::Stdio(c) => c.notify(notification).await,
            Channel::Http(c) => c.notify(notification).await,
            Channel::WebSocket(c) => c.notify(notification).await,
        }
    }

    async fn close(&self) -> McpResult<()> {
        match self {
            Channel::Stdio(c) => c.close().await,
            Channel::Http(c) => c.close().await,
            Channel::WebSocket(c) => c.close().await,
        }
    }
}

/// MCP client bound to a single backend
pub struct McpClient {
    backend_id: String,
    channel: Channel,
}

impl McpClient {
    /// Open the channel described by `descriptor` without handshaking
    async fn open(backend_id: &str, descriptor: &TransportDescriptor) -> McpResult<Self> {
        let channel = match &descriptor.channel {
            ChannelSpec::Stdio {
                command,
                args,
                working_dir,
                env,
            } => Channel::Stdio(StdioChannel::spawn(
                backend_id,
                command,
                args,
                working_dir.as_deref(),
                env,
            )?),
            ChannelSpec::Http {
                url,
                headers,
                timeout,
            } => Channel::Http(HttpChannel::new(url.clone(), headers, *timeout)?),
            ChannelSpec::WebSocket { url, protocols } => {
                Channel::WebSocket(WebSocketChannel::connect(backend_id, url, protocols).await?)
            }
        };

        Ok(Self {
            backend_id: backend_id.to_string(),
            channel,
        })
    }

    /// Run the initialize handshake followed by `notifications/initialized`
    async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities::default(),
            client_info: Implementation {
                name: format!("mcphub-{}", self.backend_id),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })?;

        let result: InitializeResult = self.call("initialize", Some(params)).await?;

        tracing::info!(
            backend_id = %self.backend_id,
            server = %result.server_info.name,
            server_version = %result.server_info.version,
            protocol_version = %result.protocol_version,
            "MCP handshake complete"
        );

        self.channel
            .notify(&JsonRpcNotification::new("notifications/initialized"))
            .await?;

        Ok(result)
    }

    /// Send a request and unwrap the JSON-RPC envelope
    async fn call_raw(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let response = self.channel.request(method, params).await?;

        if let Some(error) = response.error {
            return Err(McpClientError::McpError(error.message));
        }

        response.result.ok_or(McpClientError::InvalidResponse)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let result = self.call_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl McpSession for McpClient {
    async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let page: ToolsListResult = self.call("tools/list", Some(params)).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;
        let result: ToolCallResult = self.call("tools/call", Some(params)).await?;

        if result.is_error {
            tracing::debug!(backend_id = %self.backend_id, tool = %name, "Tool reported isError");
        }

        Ok(result.content)
    }

    async fn list_resources(&self) -> McpResult<Value> {
        self.call_raw("resources/list", Some(serde_json::json!({}))).await
    }

    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.call_raw("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await
    }

    async fn list_prompts(&self) -> McpResult<Value> {
        self.call_raw("prompts/list", Some(serde_json::json!({}))).await
    }

    async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let mut params = serde_json::json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        self.call_raw("prompts/get", Some(params)).await
    }

    async fn close(&self) -> McpResult<()> {
        tracing::debug!(backend_id = %self.backend_id, "Closing MCP client");
        self.channel.close().await
    }
}

/// Production connector: real transports, real handshake
#[derive(Debug, Default, Clone)]
pub struct McpClientConnector;

impl McpClientConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl McpConnector for McpClientConnector {
    async fn connect(
        &self,
        backend_id: &str,
        descriptor: &TransportDescriptor,
    ) -> McpResult<Arc<dyn McpSession>> {
        let client = McpClient::open(backend_id, descriptor).await?;

        let handshake = tokio::time::timeout(INIT_TIMEOUT, client.initialize()).await;
        let outcome = match handshake {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpClientError::Timeout),
        };

        if let Err(e) = outcome {
            if let Err(close_err) = client.close().await {
                tracing::debug!(
                    backend_id = %backend_id,
                    error = %close_err,
                    "Error closing client after failed handshake"
                );
            }
            return Err(e);
        }

        Ok(Arc::new(client))
    }
}
