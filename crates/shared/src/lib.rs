//! McpHub Shared Types
//!
//! This crate contains the data model shared between the gateway core and its
//! HTTP surface: backend configuration, connection status, call envelopes and
//! metrics snapshots.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
