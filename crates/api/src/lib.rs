//! McpHub API Library
//!
//! Gateway server components: backend supervision, tool invocation and the
//! REST and JSON-RPC front ends.

pub mod config;
pub mod error;
pub mod mcp;
pub mod routes;
pub mod security;
pub mod state;

pub use config::{Config, ConfigStore};
pub use error::{ApiError, ApiResult};
pub use state::AppState;
