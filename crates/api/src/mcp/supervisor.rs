//! Connection Supervisor
//!
//! Owns one client handle and one published status per backend and drives
//! each backend through `connecting -> connected | error`. Callers only ever
//! see clones of the status record.
//!
//! Every backend has an async read/write gate around its client slot.
//! Lifecycle operations (start, refresh, remove, shutdown) take it
//! exclusively; tool calls and passthroughs hold it shared for the whole call,
//! so a refresh waits for in-flight calls and never closes a client under them.
//! Shutdown is the exception: it waits at most [`SHUTDOWN_GRACE`] per backend
//! and then closes the client underneath any call still holding it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use mcphub_shared::{BackendConfig, BackendMap, ConnectionState, ConnectionStatus, Tool};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::OwnedRwLockReadGuard;

use super::client::{McpClientError, McpConnector, McpResult, McpSession};
use super::metrics::MetricsAggregator;
use super::transport::{self, TransportDescriptor};

/// A connected backend: its session and the descriptor it was opened with
pub struct LiveSession {
    pub session: Arc<dyn McpSession>,
    pub descriptor: TransportDescriptor,
}

/// How long shutdown waits for in-flight calls on one backend
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Slot = Option<LiveSession>;
type Gate = Arc<tokio::sync::RwLock<Slot>>;

/// Shared hold on a live session; lifecycle changes wait until it is dropped
pub struct SessionLease {
    guard: OwnedRwLockReadGuard<Slot, LiveSession>,
}

impl Deref for SessionLease {
    type Target = LiveSession;

    fn deref(&self) -> &LiveSession {
        &self.guard
    }
}

#[derive(Default)]
struct Registry {
    /// Ids in registration order
    order: Vec<String>,
    configs: HashMap<String, BackendConfig>,
    statuses: HashMap<String, ConnectionStatus>,
    gates: HashMap<String, Gate>,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn McpConnector>,
    metrics: Arc<MetricsAggregator>,
    registry: RwLock<Registry>,
    shut_down: AtomicBool,
    shutdown_grace: Duration,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn McpConnector>, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            connector,
            metrics,
            registry: RwLock::new(Registry::default()),
            shut_down: AtomicBool::new(false),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Publish a `connecting` status for every enabled backend without I/O
    pub fn register_all(&self, configs: &BackendMap) {
        for (id, config) in configs.iter().filter(|(_, c)| c.enabled) {
            self.register(id, config.clone());
        }
    }

    /// Register (or re-register) a backend and publish `connecting`
    pub fn register(&self, id: &str, config: BackendConfig) {
        if self.is_shut_down() {
            return;
        }
        let mut reg = self.write();
        let status = ConnectionStatus::connecting(id, &config, transport::endpoint_hint(&config));

        if !reg.statuses.contains_key(id) {
            reg.order.push(id.to_string());
        }
        reg.statuses.insert(id.to_string(), status);
        reg.configs.insert(id.to_string(), config);
        reg.gates.entry(id.to_string()).or_default();
    }

    /// Register every enabled backend, then connect them one at a time in
    /// configuration order
    pub async fn initialize(&self, configs: &BackendMap) {
        self.register_all(configs);

        let enabled: Vec<_> = configs.iter().filter(|(_, c)| c.enabled).collect();
        for (id, config) in &enabled {
            self.start(id, (*config).clone()).await;
        }

        let connected = self
            .all_statuses()
            .iter()
            .filter(|s| s.is_connected())
            .count();
        tracing::info!(
            connected,
            total = enabled.len(),
            "Backend initialization complete"
        );
    }

    /// Connect a backend once. An existing client for the id is closed first.
    pub async fn start(&self, id: &str, config: BackendConfig) {
        self.register(id, config.clone());
        let Some(gate) = self.gate(id) else {
            return;
        };

        let mut slot = gate.write().await;
        if self.is_shut_down() {
            return;
        }
        if let Some(old) = slot.take() {
            self.close_session(id, &old.session).await;
        }
        self.publish_connecting(id, &config);
        *slot = self.connect(id, &config).await;
        self.discard_after_shutdown(id, &mut slot).await;
    }

    /// Close and reconnect a backend. No-op for unknown or disabled ids.
    pub async fn refresh(&self, id: &str) -> bool {
        let Some(gate) = self.gate(id) else {
            return false;
        };

        let mut slot = gate.write().await;
        if self.is_shut_down() {
            return false;
        }

        // Re-read under the gate: a concurrent remove may have won
        let config = match self.read().configs.get(id) {
            Some(config) if config.enabled => config.clone(),
            _ => return false,
        };

        tracing::info!(backend_id = %id, "Refreshing backend");
        if let Some(old) = slot.take() {
            self.close_session(id, &old.session).await;
        }
        self.publish_connecting(id, &config);
        *slot = self.connect(id, &config).await;
        self.discard_after_shutdown(id, &mut slot).await;
        true
    }

    /// Close one backend and forget its status and config
    pub async fn remove(&self, id: &str) -> bool {
        let Some(gate) = self.gate(id) else {
            return false;
        };

        let mut slot = gate.write().await;
        if let Some(old) = slot.take() {
            self.close_session(id, &old.session).await;
        }
        tracing::info!(backend_id = %id, state = %ConnectionState::Disconnected, "Backend removed");

        let mut reg = self.write();
        reg.order.retain(|k| k != id);
        reg.configs.remove(id);
        reg.statuses.remove(id);
        reg.gates.remove(id);
        true
    }

    /// Close every client best-effort and clear all state. Idempotent; once
    /// shut down, `register`, `start` and `refresh` do nothing.
    ///
    /// A backend whose calls outlast the grace period is closed underneath
    /// them, so one stuck backend never keeps the others open.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);

        let gates: Vec<(String, Gate)> = {
            let mut reg = self.write();
            let gates: Vec<_> = reg
                .order
                .iter()
                .filter_map(|id| reg.gates.get(id).map(|g| (id.clone(), Arc::clone(g))))
                .collect();
            *reg = Registry::default();
            gates
        };

        for (id, gate) in gates {
            match tokio::time::timeout(self.shutdown_grace, gate.write()).await {
                Ok(mut slot) => {
                    if let Some(old) = slot.take() {
                        self.close_session(&id, &old.session).await;
                        tracing::info!(backend_id = %id, state = %ConnectionState::Disconnected, "Backend disconnected");
                    }
                }
                Err(_) => self.force_close(&id, &gate).await,
            }
        }

        tracing::info!("All backends shut down");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn status(&self, id: &str) -> Option<ConnectionStatus> {
        self.read().statuses.get(id).cloned()
    }

    /// Every published status, in registration order
    pub fn all_statuses(&self) -> Vec<ConnectionStatus> {
        let reg = self.read();
        reg.order
            .iter()
            .filter_map(|id| reg.statuses.get(id).cloned())
            .collect()
    }

    pub fn config(&self, id: &str) -> Option<BackendConfig> {
        self.read().configs.get(id).cloned()
    }

    /// Shared hold on the live session for `id`, or `None` when the backend
    /// is unknown or not connected. Waits for any lifecycle change in progress.
    pub async fn lease(&self, id: &str) -> Option<SessionLease> {
        let gate = self.gate(id)?;
        let guard = gate.read_owned().await;
        OwnedRwLockReadGuard::try_map(guard, |slot| slot.as_ref())
            .ok()
            .map(|guard| SessionLease { guard })
    }

    /// Stamp `lastActivity` after a successful exchange
    pub fn touch(&self, id: &str) {
        if let Some(status) = self.write().statuses.get_mut(id) {
            status.connection_info.last_activity = Some(OffsetDateTime::now_utc());
        }
    }

    // =========================================================================
    // Passthroughs
    // =========================================================================

    pub async fn list_resources(&self, id: &str) -> McpResult<Value> {
        let lease = self.lease(id).await.ok_or(McpClientError::NotConnected)?;
        let result = lease.session.list_resources().await;
        self.touch_on_ok(id, result)
    }

    pub async fn read_resource(&self, id: &str, uri: &str) -> McpResult<Value> {
        let lease = self.lease(id).await.ok_or(McpClientError::NotConnected)?;
        let result = lease.session.read_resource(uri).await;
        self.touch_on_ok(id, result)
    }

    pub async fn list_prompts(&self, id: &str) -> McpResult<Value> {
        let lease = self.lease(id).await.ok_or(McpClientError::NotConnected)?;
        let result = lease.session.list_prompts().await;
        self.touch_on_ok(id, result)
    }

    pub async fn get_prompt(&self, id: &str, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let lease = self.lease(id).await.ok_or(McpClientError::NotConnected)?;
        let result = lease.session.get_prompt(name, arguments).await;
        self.touch_on_ok(id, result)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Resolve, connect and discover tools. Publishes the outcome and returns
    /// the new slot contents.
    async fn connect(&self, id: &str, config: &BackendConfig) -> Slot {
        let descriptor = match transport::resolve(config) {
            Ok(d) => d,
            Err(e) => {
                self.publish_error(id, e.to_string());
                return None;
            }
        };

        let endpoint = descriptor.endpoint();
        let kind = descriptor.kind();
        self.update_status(id, |status| {
            status.connection_info.transport_kind = kind.to_string();
            status.connection_info.endpoint = endpoint.clone();
        });

        tracing::info!(backend_id = %id, transport = %kind, endpoint = %endpoint, "Connecting to backend");

        let session = match self.connector.connect(id, &descriptor).await {
            Ok(s) => s,
            Err(e) => {
                self.publish_error(id, e.to_string());
                return None;
            }
        };

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                self.close_session(id, &session).await;
                self.publish_error(id, e.to_string());
                return None;
            }
        };

        let tools: Vec<Tool> = tools
            .into_iter()
            .map(|t| Tool {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
                backend_id: id.to_string(),
            })
            .collect();
        let tool_count = tools.len();

        let now = OffsetDateTime::now_utc();
        self.update_status(id, |status| {
            status.status = ConnectionState::Connected;
            status.tools = tools;
            status.error = None;
            status.connection_info.connected_at = Some(now);
            status.connection_info.last_activity = Some(now);
        });
        self.metrics.ensure_bucket(id);

        tracing::info!(backend_id = %id, tools = tool_count, "Backend connected");

        Some(LiveSession {
            session,
            descriptor,
        })
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// A connect that raced with shutdown must not leave a live client behind
    async fn discard_after_shutdown(&self, id: &str, slot: &mut Slot) {
        if !self.is_shut_down() {
            return;
        }
        if let Some(live) = slot.take() {
            self.close_session(id, &live.session).await;
        }
    }

    /// Close a session that in-flight calls still hold
    async fn force_close(&self, id: &str, gate: &Gate) {
        let session = match gate.try_read() {
            Ok(slot) => slot.as_ref().map(|live| Arc::clone(&live.session)),
            Err(_) => {
                tracing::warn!(backend_id = %id, "Backend busy with a lifecycle change; not closed");
                return;
            }
        };

        if let Some(session) = session {
            tracing::warn!(
                backend_id = %id,
                grace = ?self.shutdown_grace,
                "In-flight calls outlasted shutdown grace; closing anyway"
            );
            self.close_session(id, &session).await;
        }
    }

    fn publish_connecting(&self, id: &str, config: &BackendConfig) {
        let status = ConnectionStatus::connecting(id, config, transport::endpoint_hint(config));
        self.update_status(id, |current| *current = status);
    }

    fn publish_error(&self, id: &str, error: String) {
        tracing::error!(backend_id = %id, error = %error, "Backend connection failed");
        self.update_status(id, |status| {
            status.status = ConnectionState::Error;
            status.tools.clear();
            status.error = Some(error);
        });
    }

    fn update_status(&self, id: &str, f: impl FnOnce(&mut ConnectionStatus)) {
        if let Some(status) = self.write().statuses.get_mut(id) {
            f(status);
        }
    }

    async fn close_session(&self, id: &str, session: &Arc<dyn McpSession>) {
        if let Err(e) = session.close().await {
            tracing::warn!(backend_id = %id, error = %e, "Error closing backend client");
        }
    }

    fn touch_on_ok<T>(&self, id: &str, result: McpResult<T>) -> McpResult<T> {
        if result.is_ok() {
            self.touch(id);
        }
        result
    }

    fn gate(&self, id: &str) -> Option<Gate> {
        self.read().gates.get(id).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mcp::testing::{backend_config, tool, FakeBehavior, FakeConnector};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn supervisor(connector: &Arc<FakeConnector>) -> (ConnectionSupervisor, Arc<MetricsAggregator>) {
        let metrics = Arc::new(MetricsAggregator::new());
        (
            ConnectionSupervisor::new(connector.clone(), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_initialize_connects_enabled_backends_in_order() {
        let connector = FakeConnector::new();
        connector.set("b", FakeBehavior::with_tools(vec![tool("search"), tool("fetch")]));
        connector.set("a", FakeBehavior::default());
        let (sup, metrics) = supervisor(&connector);

        let mut configs = BackendMap::new();
        configs.insert("b", backend_config("B"));
        configs.insert("off", BackendConfig { enabled: false, ..backend_config("Off") });
        configs.insert("a", backend_config("A"));

        sup.initialize(&configs).await;

        let statuses = sup.all_statuses();
        assert_eq!(
            statuses.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert!(statuses.iter().all(|s| s.status == ConnectionState::Connected));
        assert_eq!(statuses[0].tools.len(), 2);
        assert_eq!(statuses[0].tools[0].backend_id, "b");
        assert!(statuses[0].connection_info.connected_at.is_some());
        assert!(sup.status("off").is_none());
        assert_eq!(connector.connect_order(), vec!["b", "a"]);
        assert!(metrics.snapshot().server_stats.contains_key("b"));
    }

    #[tokio::test]
    async fn test_register_publishes_connecting_without_io() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);

        sup.register("fs", backend_config("Files"));

        let status = sup.status("fs").unwrap();
        assert_eq!(status.status, ConnectionState::Connecting);
        assert!(status.tools.is_empty());
        assert_eq!(status.connection_info.endpoint, "fake-server --stdio");
        assert!(connector.connect_order().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_publishes_error() {
        let connector = FakeConnector::new();
        connector.set("fs", FakeBehavior::failing_connect("connection refused"));
        let (sup, metrics) = supervisor(&connector);

        sup.start("fs", backend_config("Files")).await;

        let status = sup.status("fs").unwrap();
        assert_eq!(status.status, ConnectionState::Error);
        assert!(status.error.unwrap().contains("connection refused"));
        assert!(sup.lease("fs").await.is_none());
        assert!(metrics.snapshot().server_stats.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_failure_closes_client() {
        let connector = FakeConnector::new();
        connector.set(
            "fs",
            FakeBehavior {
                list_error: Some("tools/list exploded".into()),
                ..FakeBehavior::default()
            },
        );
        let (sup, _) = supervisor(&connector);

        sup.start("fs", backend_config("Files")).await;

        let status = sup.status("fs").unwrap();
        assert_eq!(status.status, ConnectionState::Error);
        assert!(status.tools.is_empty());
        let sessions = connector.sessions("fs");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_never_reaches_connector() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);

        let mut config = backend_config("Broken");
        config.kind = "carrier-pigeon".into();
        sup.start("broken", config).await;

        let status = sup.status("broken").unwrap();
        assert_eq!(status.status, ConnectionState::Error);
        assert_eq!(
            status.error.as_deref(),
            Some("Unsupported transport type: carrier-pigeon")
        );
        assert!(connector.connect_order().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_closes_old_client_once() {
        let connector = FakeConnector::new();
        connector.set("fs", FakeBehavior::with_tools(vec![tool("read_file")]));
        let (sup, _) = supervisor(&connector);
        sup.start("fs", backend_config("Files")).await;
        assert!(sup.status("fs").unwrap().is_connected());

        connector.set("fs", FakeBehavior::failing_connect("backend went away"));
        assert!(sup.refresh("fs").await);

        let status = sup.status("fs").unwrap();
        assert_eq!(status.status, ConnectionState::Error);
        assert!(status.tools.is_empty());

        let sessions = connector.sessions("fs");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_tools() {
        let connector = FakeConnector::new();
        connector.set("fs", FakeBehavior::with_tools(vec![tool("old")]));
        let (sup, _) = supervisor(&connector);
        sup.start("fs", backend_config("Files")).await;

        connector.set("fs", FakeBehavior::with_tools(vec![tool("new_a"), tool("new_b")]));
        sup.refresh("fs").await;

        let names: Vec<_> = sup
            .status("fs")
            .unwrap()
            .tools
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["new_a", "new_b"]);
    }

    #[tokio::test]
    async fn test_refresh_unknown_or_disabled_is_noop() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);

        assert!(!sup.refresh("ghost").await);

        sup.register("off", BackendConfig { enabled: false, ..backend_config("Off") });
        assert!(!sup.refresh("off").await);
        assert!(connector.connect_order().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_waits_for_in_flight_lease() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);
        let sup = Arc::new(sup);
        sup.start("fs", backend_config("Files")).await;

        let lease = sup.lease("fs").await.unwrap();
        let refresh = tokio::spawn({
            let sup = sup.clone();
            async move { sup.refresh("fs").await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!refresh.is_finished());
        assert_eq!(connector.sessions("fs")[0].closes.load(Ordering::SeqCst), 0);

        drop(lease);
        assert!(refresh.await.unwrap());
        assert_eq!(connector.sessions("fs")[0].closes.load(Ordering::SeqCst), 1);
        assert!(sup.status("fs").unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_remove_and_shutdown() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);
        sup.start("a", backend_config("A")).await;
        sup.start("b", backend_config("B")).await;

        assert!(sup.remove("a").await);
        assert!(sup.status("a").is_none());
        assert!(sup.config("a").is_none());
        assert_eq!(connector.sessions("a")[0].closes.load(Ordering::SeqCst), 1);
        assert!(!sup.remove("a").await);

        sup.shutdown().await;
        sup.shutdown().await;
        assert!(sup.all_statuses().is_empty());
        assert_eq!(connector.sessions("b")[0].closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_forever_on_a_stuck_call() {
        let connector = FakeConnector::new();
        connector.set(
            "slow",
            FakeBehavior {
                call_delay: Some(Duration::from_secs(3600)),
                ..FakeBehavior::default()
            },
        );
        let (mut sup, _) = supervisor(&connector);
        sup.shutdown_grace = Duration::from_millis(50);
        let sup = Arc::new(sup);
        sup.start("slow", backend_config("Slow")).await;
        sup.start("b", backend_config("B")).await;

        let stuck = tokio::spawn({
            let sup = sup.clone();
            async move {
                let lease = sup.lease("slow").await.unwrap();
                lease.session.call_tool("wait", serde_json::json!({})).await
            }
        });
        while connector.sessions("slow")[0].calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), sup.shutdown())
            .await
            .unwrap();

        assert_eq!(connector.sessions("slow")[0].closes.load(Ordering::SeqCst), 1);
        assert_eq!(connector.sessions("b")[0].closes.load(Ordering::SeqCst), 1);
        assert!(sup.all_statuses().is_empty());
        stuck.abort();
    }

    #[tokio::test]
    async fn test_lifecycle_is_inert_after_shutdown() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);
        sup.start("a", backend_config("A")).await;

        sup.shutdown().await;

        assert!(!sup.refresh("a").await);
        sup.start("a", backend_config("A")).await;
        sup.register("c", backend_config("C"));

        assert!(sup.status("a").is_none());
        assert!(sup.status("c").is_none());
        assert!(sup.config("a").is_none());
        assert!(sup.lease("a").await.is_none());
        assert_eq!(connector.sessions("a").len(), 1);
        assert_eq!(connector.connect_order(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_start_closes_existing_client_first() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);
        sup.start("fs", backend_config("Files")).await;
        sup.start("fs", backend_config("Files v2")).await;

        let sessions = connector.sessions("fs");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
        assert_eq!(sessions[1].closes.load(Ordering::SeqCst), 0);
        assert_eq!(sup.status("fs").unwrap().name, "Files v2");
        assert_eq!(sup.all_statuses().len(), 1);
    }

    #[tokio::test]
    async fn test_passthroughs_require_connection() {
        let connector = FakeConnector::new();
        let (sup, _) = supervisor(&connector);

        assert!(matches!(
            sup.list_resources("ghost").await,
            Err(McpClientError::NotConnected)
        ));

        sup.start("fs", backend_config("Files")).await;
        let prompt = sup
            .get_prompt("fs", "summarize", Some(serde_json::json!({"topic": "rust"})))
            .await
            .unwrap();
        assert_eq!(prompt["name"], "summarize");
        assert_eq!(prompt["arguments"]["topic"], "rust");

        let read = sup.read_resource("fs", "file:///tmp/a.txt").await.unwrap();
        assert_eq!(read["contents"][0]["uri"], "file:///tmp/a.txt");
    }
}
