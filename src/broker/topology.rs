//! Queue and exchange declarations for a consumer.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use super::delivery::HeaderValue;
use crate::config::RabbitmqEndpointConfig;

pub type Arguments = BTreeMap<String, HeaderValue>;

fn convert_arguments(endpoint: &str, raw: &BTreeMap<String, Value>) -> Arguments {
    raw.iter()
        .filter_map(|(key, value)| match HeaderValue::from_json(value) {
            Some(converted) => Some((key.clone(), converted)),
            None => {
                warn!("{}: ignoring unsupported argument {} = {}", endpoint, key, value);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSpec {
    pub name: String,
    /// `direct`, `fanout`, `topic`, `headers` or a plugin type.
    pub kind: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: Arguments,
}

impl ExchangeSpec {
    /// Broker-reserved exchanges already exist and may not be redeclared.
    pub fn is_predeclared(&self) -> bool {
        self.name.starts_with("amq.")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub queue: QueueSpec,
    pub exchange: Option<ExchangeSpec>,
    pub routing_key: String,
    /// Empty lets the broker generate one.
    pub consumer_tag: String,
    pub prefetch: u16,
    pub auto_ack: bool,
}

impl Topology {
    pub fn from_config(config: &RabbitmqEndpointConfig) -> Self {
        let queue = QueueSpec {
            name: config.queue_name().to_string(),
            durable: config.queue_durable,
            exclusive: config.queue_exclusive,
            auto_delete: config.queue_auto_delete,
            arguments: convert_arguments(&config.name, &config.queue_arguments),
        };

        let exchange = config
            .exchange_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| ExchangeSpec {
                name: name.to_string(),
                kind: config.exchange_type.to_lowercase(),
                durable: config.exchange_durable,
                auto_delete: config.exchange_auto_delete,
                arguments: convert_arguments(&config.name, &config.exchange_arguments),
            });

        Self {
            queue,
            exchange,
            routing_key: config.routing_key().to_string(),
            consumer_tag: config.consumer_tag.clone().unwrap_or_default(),
            prefetch: config.consumer_qos,
            auto_ack: config.auto_ack,
        }
    }

    /// The exchange to declare, if any.
    pub fn exchange_to_declare(&self) -> Option<&ExchangeSpec> {
        self.exchange.as_ref().filter(|e| !e.is_predeclared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_only() {
        let config = RabbitmqEndpointConfig::new("orders", "ingest");
        let topology = Topology::from_config(&config);
        assert_eq!(topology.queue.name, "orders");
        assert_eq!(topology.routing_key, "orders");
        assert!(topology.exchange.is_none());
        assert_eq!(topology.consumer_tag, "");
        assert_eq!(topology.prefetch, 1);
    }

    #[test]
    fn test_reserved_exchange_is_bound_not_declared() {
        let mut config = RabbitmqEndpointConfig::new("orders", "ingest");
        config.exchange_name = Some("amq.topic".into());
        config.exchange_type = "Topic".into();
        config.routing_key = Some("orders.#".into());

        let topology = Topology::from_config(&config);
        let exchange = topology.exchange.as_ref().unwrap();
        assert_eq!(exchange.kind, "topic");
        assert!(topology.exchange_to_declare().is_none());
        assert_eq!(topology.routing_key, "orders.#");
    }

    #[test]
    fn test_arguments_converted() {
        let mut config = RabbitmqEndpointConfig::new("orders", "ingest");
        config
            .queue_arguments
            .insert("x-message-ttl".into(), serde_json::json!(60000));
        config
            .queue_arguments
            .insert("x-dead-letter-exchange".into(), serde_json::json!("dlx"));
        config
            .queue_arguments
            .insert("unsupported".into(), serde_json::json!({"nested": true}));

        let topology = Topology::from_config(&config);
        assert_eq!(topology.queue.arguments.len(), 2);
        assert_eq!(
            topology.queue.arguments["x-message-ttl"],
            HeaderValue::Int(60000)
        );
    }
}
