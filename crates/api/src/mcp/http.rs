//! Streamable HTTP channel: one POST per JSON-RPC message.
//!
//! Servers may answer with plain JSON or with an SSE body; both are accepted.
//! A `Mcp-Session-Id` handed out during initialize is echoed on every later
//! request and used to end the session on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::client::{McpClientError, McpResult};
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpChannel {
    client: Client,
    url: Url,
    session_id: RwLock<Option<String>>,
    next_id: AtomicI64,
}

impl HttpChannel {
    pub fn new(
        url: Url,
        headers: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> McpResult<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                McpClientError::ConnectionFailed(format!("invalid header name {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                McpClientError::ConnectionFailed(format!("invalid header value for {}: {}", name, e))
            })?;
            default_headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .default_headers(default_headers)
            .pool_max_idle_per_host(10);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url,
            session_id: RwLock::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self.post(&request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpClientError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        parse_response_body(&body)
    }

    pub async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        let response = self.post(notification).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpClientError::HttpStatus(status.as_u16()));
        }
        Ok(())
    }

    /// End the server-side session, if one was issued
    pub async fn close(&self) -> McpResult<()> {
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };

        let result = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, session_id.as_str())
            .send()
            .await;

        // Servers without session termination answer 405; that's fine too
        if let Err(e) = result {
            tracing::debug!(url = %self.url, error = %e, "Session DELETE failed");
        }

        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post<T: serde::Serialize>(&self, body: &T) -> McpResult<reqwest::Response> {
        let mut req = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(session_id) = self.session_id() {
            req = req.header(SESSION_HEADER, session_id);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                McpClientError::Timeout
            } else {
                McpClientError::HttpError(e)
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().unwrap_or_else(PoisonError::into_inner) =
                Some(session_id.to_string());
        }

        Ok(response)
    }
}

/// Parse response body handling both JSON and SSE (Server-Sent Events) formats.
///
/// For SSE the last `data:` line that parses as a response wins; earlier
/// events are progress notifications.
pub(crate) fn parse_response_body(body: &str) -> McpResult<JsonRpcResponse> {
    let trimmed = body.trim();

    if trimmed.starts_with("event:") || trimmed.starts_with("data:") || trimmed.starts_with("id:") {
        return trimmed
            .lines()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| !data.is_empty())
            .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
            .filter(|resp| resp.result.is_some() || resp.error.is_some())
            .last()
            .ok_or(McpClientError::InvalidResponse);
    }

    serde_json::from_str(trimmed).map_err(McpClientError::from)
}
