//! MCP (Model Context Protocol) Gateway Module
//!
//! Fronts a configured set of backend MCP servers and exposes their tools
//! through REST and per-backend JSON-RPC endpoints.
//!
//! # Architecture
//!
//! ```text
//! Client --> Translator --> Gateway --> Supervisor --> Backend 1 (stdio)
//!                                                  --> Backend 2 (HTTP)
//!                                                  --> Backend N (WebSocket)
//! ```
//!
//! - [`transport`] turns a backend config into a validated channel descriptor
//! - [`client`] speaks MCP over one of the three channels
//! - [`supervisor`] owns backend lifecycle and status records
//! - [`gateway`] runs tool calls with deadlines, retries and metrics
//! - [`translator`] shapes the REST and JSON-RPC façades

pub mod client;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod multiplex;
pub mod stdio;
pub mod supervisor;
pub mod translator;
pub mod transport;
pub mod types;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{McpClient, McpClientConnector, McpClientError, McpConnector, McpResult, McpSession};
pub use gateway::ToolInvocationGateway;
pub use metrics::MetricsAggregator;
pub use supervisor::{ConnectionSupervisor, SessionLease};
pub use translator::{Disposition, JsonRpcReply, ProtocolTranslator, ToolInvocationBody};
pub use transport::{RetryPolicy, TransportDescriptor};
pub use types::*;
