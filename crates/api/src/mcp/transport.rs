//! Transport Resolution
//!
//! Turns the loosely shaped transport settings of a backend config into a
//! validated [`TransportDescriptor`]. Resolution is pure: nothing here opens a
//! connection.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mcphub_shared::{BackendConfig, ConfigurationError, TransportConfig, TransportKind};
use url::Url;

/// Backoff base used when a backend sets `retryAttempts` without `retryDelay`
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How a backend wants transient failures retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where and how to reach a backend
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSpec {
    Stdio {
        command: String,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
        env: HashMap<String, String>,
    },
    Http {
        url: Url,
        headers: HashMap<String, String>,
        timeout: Option<Duration>,
    },
    WebSocket {
        url: Url,
        protocols: Vec<String>,
    },
}

/// A resolved transport: the channel to open plus the backend's retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct TransportDescriptor {
    pub channel: ChannelSpec,
    pub retry: RetryPolicy,
}

impl TransportDescriptor {
    pub fn kind(&self) -> TransportKind {
        match self.channel {
            ChannelSpec::Stdio { .. } => TransportKind::Stdio,
            ChannelSpec::Http { .. } => TransportKind::Http,
            ChannelSpec::WebSocket { .. } => TransportKind::WebSocket,
        }
    }

    /// Human-readable target shown in connection info
    pub fn endpoint(&self) -> String {
        match &self.channel {
            ChannelSpec::Stdio { command, args, .. } => command_line(command, args),
            ChannelSpec::Http { url, .. } | ChannelSpec::WebSocket { url, .. } => url.to_string(),
        }
    }

    /// Deadline configured on the backend itself, if any
    pub fn default_timeout(&self) -> Option<Duration> {
        match &self.channel {
            ChannelSpec::Http { timeout, .. } => *timeout,
            _ => None,
        }
    }
}

/// Resolve a backend config into a descriptor.
///
/// The explicit `transport` block wins over legacy top-level fields, and
/// `transport.type` wins over the backend `type`.
pub fn resolve(config: &BackendConfig) -> Result<TransportDescriptor, ConfigurationError> {
    let raw = config.effective_transport();
    let kind: TransportKind = config
        .effective_kind()
        .parse()
        .map_err(|_| ConfigurationError::UnsupportedTransport(config.effective_kind().to_string()))?;

    let channel = match kind {
        TransportKind::Stdio => {
            let command = raw
                .command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or(ConfigurationError::MissingField {
                    kind: "Stdio",
                    field: "command",
                })?;
            ChannelSpec::Stdio {
                command: command.to_string(),
                args: raw.args.clone().unwrap_or_default(),
                working_dir: raw.working_dir.as_ref().map(PathBuf::from),
                env: raw.env.clone().unwrap_or_default(),
            }
        }
        TransportKind::Http => {
            let url = required_url(raw.url.as_deref(), "HTTP", "url", &["http", "https"])?;
            ChannelSpec::Http {
                url,
                headers: raw.headers.clone().unwrap_or_default(),
                timeout: raw.timeout.filter(|ms| *ms > 0).map(Duration::from_millis),
            }
        }
        TransportKind::WebSocket => {
            let url = required_url(raw.ws_url.as_deref(), "WebSocket", "wsUrl", &["ws", "wss"])?;
            ChannelSpec::WebSocket {
                url,
                protocols: raw.protocols.clone().unwrap_or_default(),
            }
        }
    };

    Ok(TransportDescriptor {
        channel,
        retry: retry_policy(raw),
    })
}

/// Best-effort endpoint text for a config that may not resolve
pub fn endpoint_hint(config: &BackendConfig) -> String {
    let raw = config.effective_transport();
    match config.effective_kind().parse::<TransportKind>() {
        Ok(TransportKind::Stdio) => match raw.command.as_deref() {
            Some(command) => command_line(command, raw.args.as_deref().unwrap_or_default()),
            None => String::new(),
        },
        Ok(TransportKind::Http) => raw.url.clone().unwrap_or_default(),
        Ok(TransportKind::WebSocket) => raw.ws_url.clone().unwrap_or_default(),
        Err(_) => String::new(),
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn retry_policy(raw: &TransportConfig) -> RetryPolicy {
    RetryPolicy {
        attempts: raw.retry_attempts.unwrap_or(0),
        delay: raw
            .retry_delay
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_DELAY),
    }
}

fn required_url(
    value: Option<&str>,
    kind: &'static str,
    field: &'static str,
    schemes: &[&str],
) -> Result<Url, ConfigurationError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigurationError::MissingField { kind, field })?;

    let url = Url::parse(value).map_err(|e| ConfigurationError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(ConfigurationError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }

    Ok(url)
}
