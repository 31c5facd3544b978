//! RabbitMQ endpoint configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_hosts() -> String {
    "localhost".to_string()
}

fn default_ports() -> String {
    "5672".to_string()
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_heartbeat() -> u16 {
    60
}

fn default_retry_interval_ms() -> u64 {
    30_000
}

fn default_retry_count() -> i64 {
    3
}

fn default_exchange_type() -> String {
    "direct".to_string()
}

fn default_qos() -> u16 {
    1
}

fn default_unlimited() -> i64 {
    -1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitmqEndpointConfig {
    pub name: String,
    pub sequence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error_sequence: Option<String>,

    /// Comma-separated, tried in order.
    #[serde(default = "default_hosts")]
    pub hosts: String,
    /// Comma-separated, one per host.
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest", skip_serializing)]
    pub password: String,
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_ms: Option<u64>,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// -1 retries forever.
    #[serde(default = "default_retry_count")]
    pub retry_count: i64,

    /// Defaults to the endpoint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub queue_durable: bool,
    #[serde(default)]
    pub queue_exclusive: bool,
    #[serde(default)]
    pub queue_auto_delete: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub queue_arguments: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_name: Option<String>,
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    #[serde(default)]
    pub exchange_durable: bool,
    #[serde(default)]
    pub exchange_auto_delete: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exchange_arguments: BTreeMap<String, serde_json::Value>,
    /// Defaults to the queue name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_tag: Option<String>,
    #[serde(default = "default_qos")]
    pub consumer_qos: u16,
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default)]
    pub requeue_delay_ms: u64,
    /// Ceiling on the first `x-death` count, -1 disables it.
    #[serde(default = "default_unlimited")]
    pub max_dead_lettered_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_routing_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default = "default_unlimited")]
    pub message_size_limit: i64,
}

impl RabbitmqEndpointConfig {
    pub fn new(name: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
            on_error_sequence: None,
            hosts: default_hosts(),
            ports: default_ports(),
            username: default_guest(),
            password: default_guest(),
            virtual_host: default_virtual_host(),
            ssl_enabled: false,
            heartbeat_secs: default_heartbeat(),
            connection_timeout_ms: None,
            retry_interval_ms: default_retry_interval_ms(),
            retry_count: default_retry_count(),
            queue_name: None,
            queue_durable: false,
            queue_exclusive: false,
            queue_auto_delete: false,
            queue_arguments: BTreeMap::new(),
            exchange_name: None,
            exchange_type: default_exchange_type(),
            exchange_durable: false,
            exchange_auto_delete: false,
            exchange_arguments: BTreeMap::new(),
            routing_key: None,
            consumer_tag: None,
            consumer_qos: default_qos(),
            auto_ack: false,
            requeue_delay_ms: 0,
            max_dead_lettered_count: default_unlimited(),
            error_exchange: None,
            error_routing_key: None,
            content_type: None,
            message_size_limit: default_unlimited(),
        }
    }

    pub fn queue_name(&self) -> &str {
        self.queue_name.as_deref().unwrap_or(&self.name)
    }

    pub fn routing_key(&self) -> &str {
        self.routing_key.as_deref().unwrap_or_else(|| self.queue_name())
    }

    /// Split `hosts`/`ports` into pairs. The lists must be the same length.
    pub fn host_ports(&self) -> Result<Vec<(String, u16)>, String> {
        let hosts: Vec<&str> = self.hosts.split(',').map(str::trim).collect();
        let ports: Vec<&str> = self.ports.split(',').map(str::trim).collect();
        if hosts.len() != ports.len() {
            return Err(format!(
                "{} host(s) but {} port(s)",
                hosts.len(),
                ports.len()
            ));
        }
        hosts
            .into_iter()
            .zip(ports)
            .map(|(host, port)| {
                if host.is_empty() {
                    return Err("empty host name".to_string());
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port '{}'", port))?;
                Ok((host.to_string(), port))
            })
            .collect()
    }
}
