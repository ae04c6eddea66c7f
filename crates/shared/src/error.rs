//! Error types for McpHub

use thiserror::Error;

/// A backend configuration that cannot be turned into a usable transport.
///
/// Never reaches an API caller directly: the supervisor converts it into an
/// `error` connection status for the offending backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{kind} transport requires {field} configuration")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Unsupported transport type: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
}
