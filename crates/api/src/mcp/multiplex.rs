//! Request/response correlation for full-duplex channels.
//!
//! Stdio and WebSocket backends share one stream for every request, so each
//! outgoing request gets a fresh numeric id and a oneshot slot that the reader
//! task fills when the matching response arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use super::client::{McpClientError, McpResult};
use super::types::JsonRpcResponse;

#[derive(Debug, Default)]
pub struct PendingRequests {
    next_id: AtomicI64,
    slots: Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve an id and a slot for its response.
    ///
    /// Dropping the returned ticket (for instance when the caller's deadline
    /// fires) releases the slot.
    pub fn register(self: &Arc<Self>) -> McpResult<PendingTicket> {
        // `closed` is only read or written with the slots locked
        let mut slots = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpClientError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        slots.insert(id, tx);
        drop(slots);

        Ok(PendingTicket {
            id,
            rx: Some(rx),
            owner: Arc::clone(self),
        })
    }

    /// Route one inbound frame. Returns `false` when it was not a response to
    /// anything we are waiting on.
    pub fn dispatch(&self, frame: &str) -> bool {
        let value: Value = match serde_json::from_str(frame) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-JSON frame from backend");
                return false;
            }
        };

        // Server-initiated requests and notifications carry a method
        if value.get("method").is_some() {
            tracing::debug!(
                method = value.get("method").and_then(serde_json::Value::as_str).unwrap_or_default(),
                "Ignoring server-initiated message"
            );
            return false;
        }

        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed JSON-RPC response");
                return false;
            }
        };

        let Some(id) = response.id.as_ref().and_then(|id| id.as_i64()) else {
            return false;
        };

        match self.lock().remove(&id) {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(id, "Response for unknown or abandoned request");
                false
            }
        }
    }

    /// Fail every waiter and refuse new registrations.
    pub fn close(&self) {
        let mut slots = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        slots.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<JsonRpcResponse>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved request id awaiting its response
#[derive(Debug)]
pub struct PendingTicket {
    id: i64,
    rx: Option<oneshot::Receiver<JsonRpcResponse>>,
    owner: Arc<PendingRequests>,
}

impl PendingTicket {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub async fn wait(mut self) -> McpResult<JsonRpcResponse> {
        let rx = self.rx.take().ok_or(McpClientError::ConnectionClosed)?;
        rx.await.map_err(|_| McpClientError::ConnectionClosed)
    }
}

impl Drop for PendingTicket {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.id);
    }
}
