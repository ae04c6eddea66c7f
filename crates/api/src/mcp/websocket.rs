//! WebSocket channel: JSON-RPC in text frames over a single socket.

use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::client::{McpClientError, McpResult};
use super::multiplex::PendingRequests;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WebSocketChannel {
    write: Mutex<WsSink>,
    pending: Arc<PendingRequests>,
    reader: JoinHandle<()>,
}

impl WebSocketChannel {
    pub async fn connect(backend_id: &str, url: &Url, protocols: &[String]) -> McpResult<Self> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| McpClientError::ConnectionFailed(e.to_string()))?;

        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|e| McpClientError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (stream, _) = connect_async(request).await.map_err(|e| {
            McpClientError::ConnectionFailed(format!("WebSocket connect to {} failed: {}", url, e))
        })?;

        tracing::info!(backend_id = %backend_id, url = %url, "WebSocket connected");

        let (write, mut read) = stream.split();
        let pending = PendingRequests::new();

        let reader = {
            let pending = Arc::clone(&pending);
            let backend_id = backend_id.to_string();
            tokio::spawn(async move {
                while let Some(frame) = read.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            pending.dispatch(&text);
                        }
                        Ok(Message::Close(_)) => {
                            tracing::debug!(backend_id = %backend_id, "WebSocket closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(backend_id = %backend_id, error = %e, "WebSocket read failed");
                            break;
                        }
                    }
                }
                pending.close();
            })
        };

        Ok(Self {
            write: Mutex::new(write),
            pending,
            reader,
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<JsonRpcResponse> {
        let ticket = self.pending.register()?;
        let request = JsonRpcRequest::new(ticket.id(), method, params);
        self.send_text(serde_json::to_string(&request)?).await?;
        ticket.wait().await
    }

    pub async fn notify(&self, notification: &JsonRpcNotification) -> McpResult<()> {
        self.send_text(serde_json::to_string(notification)?).await
    }

    async fn send_text(&self, json: String) -> McpResult<()> {
        self.write
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| McpClientError::ConnectionFailed(format!("WebSocket send failed: {}", e)))
    }

    pub async fn close(&self) -> McpResult<()> {
        let _ = self.write.lock().await.send(Message::Close(None)).await;
        self.pending.close();
        self.reader.abort();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Answers every request with `{"echo": <method>}`, skipping notifications
    async fn spawn_echo_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                if request.get("id").is_none() {
                    continue;
                }
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"echo": request["method"]}
                });
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        });

        Url::parse(&format!("ws://{}/", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let url = spawn_echo_server().await;
        let channel = WebSocketChannel::connect("ws-test", &url, &[]).await.unwrap();

        channel
            .notify(&JsonRpcNotification::new("notifications/initialized"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            channel.request("tools/list", None),
            channel.request("prompts/list", None)
        );
        assert_eq!(a.unwrap().result.unwrap()["echo"], "tools/list");
        assert_eq!(b.unwrap().result.unwrap()["echo"], "prompts/list");

        channel.close().await.unwrap();
        assert!(matches!(
            channel.request("tools/list", None).await,
            Err(McpClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/", addr)).unwrap();
        let result = WebSocketChannel::connect("ws-test", &url, &["mcp".to_string()]).await;
        assert!(matches!(result, Err(McpClientError::ConnectionFailed(_))));
    }
}
