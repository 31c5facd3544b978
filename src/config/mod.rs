//! Configuration management for inbound endpoints using the prefer crate.
//!
//! A configuration file declares injection sequences and the endpoints that
//! feed them:
//!
//! ```toml
//! node_id = "worker-1"
//!
//! [sequences.ingest]
//! command = "ingest-order"
//! args = ["--source", "{file}"]
//!
//! [[endpoints]]
//! protocol = "file"
//! name = "orders"
//! file_uri = "/var/spool/orders/*"
//! sequence = "ingest"
//! action_after_process = "move"
//! move_after_process = "/var/spool/orders-done"
//! ```

mod file;
mod rabbitmq;

pub use file::FileEndpointConfig;
pub use rabbitmq::RabbitmqEndpointConfig;

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::file::{FileUri, ScanOptions};
use crate::process::SequenceConfig;

pub const ENV_NODE_ID: &str = "INBOUND_NODE_ID";
pub const ENV_BROKER_PASSWORD: &str = "INBOUND_BROKER_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration file found")]
    NotFound,
    #[error("Failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to parse {format} config: {reason}")]
    Parse {
        format: &'static str,
        reason: String,
    },
    #[error("Endpoint '{endpoint}': {reason}")]
    Invalid { endpoint: String, reason: String },
    #[error("Duplicate endpoint name '{0}'")]
    Duplicate(String),
    #[error("Unknown endpoint '{0}'")]
    UnknownEndpoint(String),
}

impl ConfigError {
    fn invalid(endpoint: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

/// One inbound endpoint, selected by its `protocol` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum EndpointConfig {
    File(FileEndpointConfig),
    Rabbitmq(RabbitmqEndpointConfig),
}

impl EndpointConfig {
    pub fn name(&self) -> &str {
        match self {
            EndpointConfig::File(c) => &c.name,
            EndpointConfig::Rabbitmq(c) => &c.name,
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            EndpointConfig::File(_) => "file",
            EndpointConfig::Rabbitmq(_) => "rabbitmq",
        }
    }

    pub fn sequence(&self) -> &str {
        match self {
            EndpointConfig::File(c) => &c.sequence,
            EndpointConfig::Rabbitmq(c) => &c.sequence,
        }
    }

    pub fn on_error_sequence(&self) -> Option<&str> {
        match self {
            EndpointConfig::File(c) => c.on_error_sequence.as_deref(),
            EndpointConfig::Rabbitmq(c) => c.on_error_sequence.as_deref(),
        }
    }

    /// Check everything that would otherwise fail at runtime. Any error here
    /// aborts startup of this endpoint only.
    pub fn validate(&self, sequences: &HashMap<String, SequenceConfig>) -> Result<(), ConfigError> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(ConfigError::invalid("<unnamed>", "endpoint name is required"));
        }
        if self.sequence().trim().is_empty() {
            return Err(ConfigError::invalid(name, "sequence is required"));
        }
        for sequence in std::iter::once(self.sequence()).chain(self.on_error_sequence()) {
            if !sequences.contains_key(sequence) {
                return Err(ConfigError::invalid(
                    name,
                    format!("sequence '{}' is not defined", sequence),
                ));
            }
        }

        match self {
            EndpointConfig::File(c) => validate_file(c),
            EndpointConfig::Rabbitmq(c) => validate_rabbitmq(c),
        }
    }
}

fn validate_strftime(endpoint: &str, key: &str, format: &Option<String>) -> Result<(), ConfigError> {
    if let Some(format) = format {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::invalid(
                endpoint,
                format!("{} '{}' is not a valid timestamp format", key, format),
            ));
        }
    }
    Ok(())
}

fn validate_uri(endpoint: &str, key: &str, uri: Option<&str>) -> Result<(), ConfigError> {
    if let Some(uri) = uri {
        FileUri::parse(uri)
            .map_err(|e| ConfigError::invalid(endpoint, format!("{}: {}", key, e)))?;
    }
    Ok(())
}

fn validate_file(c: &FileEndpointConfig) -> Result<(), ConfigError> {
    let name = c.name.as_str();
    if c.interval_ms == 0 {
        return Err(ConfigError::invalid(name, "interval_ms must be positive"));
    }
    validate_uri(name, "file_uri", Some(&c.file_uri))?;
    validate_uri(name, "move_after_process", c.move_after_process.as_deref())?;
    validate_uri(name, "move_after_failure", c.move_after_failure.as_deref())?;
    if let Some(ref pattern) = c.file_name_pattern {
        ScanOptions::compile_pattern(pattern).map_err(|e| {
            ConfigError::invalid(name, format!("file_name_pattern: {}", e))
        })?;
    }
    validate_strftime(name, "move_timestamp_format", &c.move_timestamp_format)?;
    validate_strftime(name, "subfolder_timestamp", &c.subfolder_timestamp)?;
    Ok(())
}

fn validate_rabbitmq(c: &RabbitmqEndpointConfig) -> Result<(), ConfigError> {
    c.host_ports()
        .map_err(|reason| ConfigError::invalid(&c.name, reason))?;
    if c.consumer_qos == 0 {
        return Err(ConfigError::invalid(&c.name, "consumer_qos must be positive"));
    }
    if c.error_exchange.is_some() && c.error_routing_key.is_none() {
        return Err(ConfigError::invalid(
            &c.name,
            "error_exchange requires error_routing_key",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lock owner identity. Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Injection sequences by name.
    #[serde(default)]
    pub sequences: HashMap<String, SequenceConfig>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load the configuration with prefer.
    pub async fn load() -> Result<Self, ConfigError> {
        let discovered = prefer::load("inbound")
            .await
            .map_err(|_| ConfigError::NotFound)?;
        match discovered.source_path() {
            Some(path) => Self::load_from_path(path).await,
            None => Err(ConfigError::NotFound),
        }
    }

    /// Load configuration from a specific file path.
    /// The format is picked from the extension, JSON otherwise.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                reason: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                reason: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                reason: e.to_string(),
            }),
        }
    }

    /// Environment variables take precedence over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(node) = std::env::var(ENV_NODE_ID).ok().filter(|s| !s.is_empty()) {
            tracing::debug!("Using {} from environment: {}", ENV_NODE_ID, node);
            self.node_id = Some(node);
        }
        if let Some(password) = std::env::var(ENV_BROKER_PASSWORD)
            .ok()
            .filter(|s| !s.is_empty())
        {
            tracing::debug!("Using {} from environment", ENV_BROKER_PASSWORD);
            for endpoint in &mut self.endpoints {
                if let EndpointConfig::Rabbitmq(c) = endpoint {
                    c.password = password.clone();
                }
            }
        }
        self
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Lock owner identity: configured node id, else the host name.
    pub fn node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }

    pub fn endpoint(&self, name: &str) -> Result<&EndpointConfig, ConfigError> {
        self.endpoints
            .iter()
            .find(|e| e.name() == name)
            .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string()))
    }

    /// Validate every endpoint, returning all problems found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name()) {
                problems.push(ConfigError::Duplicate(endpoint.name().to_string()));
                continue;
            }
            if let Err(e) = endpoint.validate(&self.sequences) {
                problems.push(e);
            }
        }
        problems
    }
}
