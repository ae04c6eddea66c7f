//! Application configuration
//!
//! Process settings come from the environment; the backend list and proxy
//! options live in a JSON gateway document managed by [`ConfigStore`].

use std::env;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mcphub_shared::{BackendConfig, BackendMap};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/mcp-servers.json";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the gateway document
    pub config_path: PathBuf,
    /// Overrides `proxy.host:proxy.port` when set
    pub bind_address: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "pretty" | "" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::Invalid("LOG_FORMAT", value)),
            },
            Err(_) => LogFormat::Pretty,
        };

        Ok(Self {
            config_path: env::var("MCPHUB_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            bind_address: env::var("BIND_ADDRESS").ok().filter(|s| !s.trim().is_empty()),
            log_format,
        })
    }

    /// Address to listen on, falling back to the document's host and port
    pub fn listen_address(&self, proxy: &ProxyConfig) -> String {
        self.bind_address
            .clone()
            .unwrap_or_else(|| format!("{}:{}", proxy.host, proxy.port))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
    #[error("Invalid size: {0}")]
    InvalidSize(String),
}

/// HTTP front-end options from the gateway document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub port: u16,
    pub host: String,
    pub cors: bool,
    /// Reported by `/info`; not enforced
    pub rate_limit: u32,
    /// Milliseconds
    pub request_timeout: u64,
    pub max_request_size: String,
    pub enable_metrics: bool,
    pub enable_logging: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "localhost".to_string(),
            cors: true,
            rate_limit: 1000,
            request_timeout: 30_000,
            max_request_size: "10mb".to_string(),
            enable_metrics: true,
            enable_logging: true,
        }
    }
}

impl ProxyConfig {
    /// Request body limit in bytes
    pub fn max_request_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.max_request_size)
    }
}

/// The on-disk gateway document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayDocument {
    #[serde(default)]
    pub servers: BackendMap,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Parse sizes like `512`, `512b`, `64kb`, `10mb` or `1gb`
pub fn parse_size(input: &str) -> Result<usize, ConfigError> {
    let normalized = input.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, unit) = normalized.split_at(split);

    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => return Err(ConfigError::InvalidSize(input.to_string())),
    };

    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| ConfigError::InvalidSize(input.to_string()))
}

/// Owner of the gateway document and its file
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<GatewayDocument>,
}

impl ConfigStore {
    /// Load the document at `path`; any failure yields the default document
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = read_document(&path);
        Self {
            path,
            document: RwLock::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reload(&self) {
        let document = read_document(&self.path);
        *self.write() = document;
    }

    pub fn document(&self) -> GatewayDocument {
        self.read().clone()
    }

    pub fn servers(&self) -> BackendMap {
        self.read().servers.clone()
    }

    pub fn server(&self, id: &str) -> Option<BackendConfig> {
        self.read().servers.get(id).cloned()
    }

    pub fn proxy(&self) -> ProxyConfig {
        self.read().proxy.clone()
    }

    /// Insert or replace a backend and persist the document
    pub fn update_server(&self, id: &str, config: BackendConfig) {
        let snapshot = {
            let mut document = self.write();
            document.servers.insert(id, config);
            document.clone()
        };
        self.persist(&snapshot);
    }

    /// Remove a backend and persist the document. Returns false if it was absent.
    pub fn remove_server(&self, id: &str) -> bool {
        let snapshot = {
            let mut document = self.write();
            if document.servers.remove(id).is_none() {
                return false;
            }
            document.clone()
        };
        self.persist(&snapshot);
        true
    }

    fn persist(&self, document: &GatewayDocument) {
        if let Err(e) = write_document(&self.path, document) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Failed to save configuration file"
            );
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GatewayDocument> {
        self.document.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GatewayDocument> {
        self.document.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_document(path: &Path) -> GatewayDocument {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str::<GatewayDocument>(&raw).map_err(|e| e.to_string()));

    match parsed {
        Ok(document) => {
            tracing::info!(
                path = %path.display(),
                servers = document.servers.len(),
                "Loaded configuration"
            );
            document
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to load configuration file, using defaults"
            );
            GatewayDocument::default()
        }
    }
}

fn write_document(path: &Path, document: &GatewayDocument) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_string_pretty(document).map_err(std::io::Error::other)?;
    std::fs::write(path, body)
}
