//! RabbitMQ consumer endpoint.
//!
//! The client library sits behind `BrokerSession`; everything else
//! (claiming, acknowledgement policy, dead-letter ceiling, reconnects)
//! works on library-independent `Delivery` values.

#[cfg(feature = "amqp-broker")]
pub mod amqp;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod topology;

#[cfg(feature = "amqp-broker")]
pub use amqp::{AmqpConnector, AmqpSession};
pub use connection::AmqpAddresses;
pub use consumer::{ConsumerLoop, ConsumerStats};
pub use delivery::{DeathRecord, Delivery, DeliveryProperties, HeaderValue};
pub use queue::BrokerQueue;
pub use resolver::{DeliveryPolicy, DeliveryResolver};
pub use session::{BrokerError, BrokerSession};
pub use topology::{ExchangeSpec, QueueSpec, Topology};
