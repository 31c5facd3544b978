//! Broker session seam.

use async_trait::async_trait;
use thiserror::Error;

use super::delivery::Delivery;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Channel error: {0}")]
    Channel(String),
    #[error("Invalid broker configuration: {0}")]
    Config(String),
}

/// A live connection + channel + consumer subscription.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Next pushed delivery. `None` means the subscription ended.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    async fn ack(&self, tag: u64) -> Result<(), BrokerError>;

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Republish a delivery's body and properties.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        delivery: &Delivery,
    ) -> Result<(), BrokerError>;

    /// Close without acknowledging in-flight deliveries, so the broker
    /// redelivers them.
    async fn abort(&mut self);
}
