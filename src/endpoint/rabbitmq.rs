use std::sync::Arc;

use tracing::info;

use super::{invalid, EndpointContext};
use crate::broker::{
    AmqpAddresses, AmqpConnector, BrokerQueue, ConsumerLoop, DeliveryPolicy, DeliveryResolver,
    Topology,
};
use crate::config::{ConfigError, RabbitmqEndpointConfig};
use crate::work_queue::{RetryPolicy, RetryingConnector};

pub type AmqpConsumer = ConsumerLoop<BrokerQueue<AmqpConnector>, DeliveryResolver>;

/// Build the consumer loop for a RabbitMQ endpoint.
pub fn build_rabbitmq_endpoint(
    config: &RabbitmqEndpointConfig,
    ctx: &EndpointContext,
) -> Result<AmqpConsumer, ConfigError> {
    let addresses = AmqpAddresses::from_config(config).map_err(|e| invalid(&config.name, e))?;
    let topology = Topology::from_config(config);
    info!(
        "{}: consuming queue '{}' from {}",
        config.name,
        topology.queue.name,
        addresses.describe()
    );

    let connector = RetryingConnector::new(
        AmqpConnector::new(addresses, topology),
        RetryPolicy::from_config(config.retry_count, config.retry_interval_ms),
    );
    let queue = BrokerQueue::new(&config.name, connector, ctx.cancel.clone());
    let resolver = DeliveryResolver::new(&config.name, DeliveryPolicy::from_config(config));

    let processor = Arc::new(ctx.processor(
        &config.name,
        &config.sequence,
        config.on_error_sequence.as_deref(),
        config.message_size_limit,
        config.content_type.as_deref(),
    ));

    Ok(ConsumerLoop::new(
        &config.name,
        queue,
        resolver,
        processor,
        ctx.cancel.clone(),
    ))
}
