//! Shared application state

use std::sync::Arc;
use std::time::Instant;

use crate::config::{ConfigStore, ProxyConfig};
use crate::mcp::{
    ConnectionSupervisor, McpConnector, MetricsAggregator, ProtocolTranslator,
    ToolInvocationGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub gateway: ToolInvocationGateway,
    pub translator: ProtocolTranslator,
    pub metrics: Arc<MetricsAggregator>,
    pub config_store: Arc<ConfigStore>,
    pub started: Instant,
}

impl AppState {
    /// Wire the gateway components around `connector` and register every
    /// configured backend as `connecting`
    pub fn new(connector: Arc<dyn McpConnector>, config_store: Arc<ConfigStore>) -> Self {
        let metrics = Arc::new(MetricsAggregator::new());
        let supervisor = Arc::new(ConnectionSupervisor::new(connector, metrics.clone()));
        supervisor.register_all(&config_store.servers());

        let gateway = ToolInvocationGateway::new(supervisor.clone(), metrics.clone());
        let translator = ProtocolTranslator::new(supervisor.clone(), gateway.clone());

        Self {
            supervisor,
            gateway,
            translator,
            metrics,
            config_store,
            started: Instant::now(),
        }
    }

    pub fn proxy(&self) -> ProxyConfig {
        self.config_store.proxy()
    }

    /// Connect every enabled backend in configuration order
    pub async fn connect_backends(&self) {
        let servers = self.config_store.servers();
        self.supervisor.initialize(&servers).await;
    }
}
