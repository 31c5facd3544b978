//! RabbitMQ session backed by lapin.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, warn};

use super::connection::AmqpAddresses;
use super::delivery::{Delivery, DeliveryProperties, HeaderValue};
use super::session::{BrokerError, BrokerSession};
use super::topology::{Arguments, Topology};
use crate::utils::mask_credentials;
use crate::work_queue::Connect;

/// Upper bound on the close handshake at shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

fn channel_error(e: lapin::Error) -> BrokerError {
    BrokerError::Channel(e.to_string())
}

fn from_amqp(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(b) => HeaderValue::Bool(*b),
        AMQPValue::ShortShortInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortShortUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::ShortUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongUInt(n) => HeaderValue::Int(i64::from(*n)),
        AMQPValue::LongLongInt(n) => HeaderValue::Int(*n),
        AMQPValue::Float(n) => HeaderValue::Float(f64::from(*n)),
        AMQPValue::Double(n) => HeaderValue::Float(*n),
        AMQPValue::DecimalValue(d) => {
            HeaderValue::Float(f64::from(d.value) / 10f64.powi(i32::from(d.scale)))
        }
        AMQPValue::ShortString(s) => HeaderValue::Str(s.as_str().to_string()),
        AMQPValue::LongString(s) => {
            HeaderValue::Str(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            HeaderValue::Array(items.as_slice().iter().map(from_amqp).collect())
        }
        AMQPValue::Timestamp(t) => HeaderValue::Int(i64::try_from(*t).unwrap_or(i64::MAX)),
        AMQPValue::FieldTable(table) => HeaderValue::Table(from_table(table)),
        AMQPValue::ByteArray(bytes) => HeaderValue::Bytes(bytes.as_slice().to_vec()),
        AMQPValue::Void => HeaderValue::Void,
    }
}

fn from_table(table: &FieldTable) -> BTreeMap<String, HeaderValue> {
    table
        .inner()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), from_amqp(v)))
        .collect()
}

fn to_amqp(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Str(s) => AMQPValue::LongString(s.clone().into()),
        HeaderValue::Int(n) => AMQPValue::LongLongInt(*n),
        HeaderValue::Float(n) => AMQPValue::Double(*n),
        HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
        HeaderValue::Bytes(b) => AMQPValue::ByteArray(b.clone().into()),
        HeaderValue::Array(items) => {
            AMQPValue::FieldArray(items.iter().map(to_amqp).collect::<Vec<_>>().into())
        }
        HeaderValue::Table(table) => AMQPValue::FieldTable(to_table(table)),
        HeaderValue::Void => AMQPValue::Void,
    }
}

fn to_table(map: &Arguments) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in map {
        table.insert(ShortString::from(key.clone()), to_amqp(value));
    }
    table
}

fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "topic" => ExchangeKind::Topic,
        "headers" => ExchangeKind::Headers,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

fn short(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_string())
}

fn convert_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let props = &delivery.properties;
    let properties = DeliveryProperties {
        content_type: short(props.content_type()),
        content_encoding: short(props.content_encoding()),
        correlation_id: short(props.correlation_id()),
        message_id: short(props.message_id()),
        reply_to: short(props.reply_to()),
        headers: props.headers().as_ref().map(from_table).unwrap_or_default(),
    };
    Delivery {
        tag: delivery.delivery_tag,
        body: delivery.data,
        properties,
        redelivered: delivery.redelivered,
    }
}

fn outgoing_properties(delivery: &Delivery) -> BasicProperties {
    let p = &delivery.properties;
    let mut props = BasicProperties::default();
    if let Some(ref v) = p.content_type {
        props = props.with_content_type(v.clone().into());
    }
    if let Some(ref v) = p.content_encoding {
        props = props.with_content_encoding(v.clone().into());
    }
    if let Some(ref v) = p.correlation_id {
        props = props.with_correlation_id(v.clone().into());
    }
    if let Some(ref v) = p.message_id {
        props = props.with_message_id(v.clone().into());
    }
    if let Some(ref v) = p.reply_to {
        props = props.with_reply_to(v.clone().into());
    }
    if !p.headers.is_empty() {
        props = props.with_headers(to_table(&p.headers));
    }
    props
}

pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        self.consumer
            .next()
            .await
            .map(|next| next.map(convert_delivery).map_err(channel_error))
    }

    async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(channel_error)
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(tag, BasicRejectOptions { requeue })
            .await
            .map_err(channel_error)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        delivery: &Delivery,
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &delivery.body,
                outgoing_properties(delivery),
            )
            .await
            .map_err(channel_error)?
            .await
            .map_err(channel_error)?;
        Ok(())
    }

    async fn abort(&mut self) {
        close_within(self.connection.close(200, "shutdown"), CLOSE_TIMEOUT).await;
    }
}

/// Await a graceful close, abandoning it after `limit`. Returns true if the
/// close completed in time.
async fn close_within<F, E>(close: F, limit: Duration) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, close).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Error closing AMQP connection: {}", e);
            true
        }
        Err(_) => {
            warn!(
                "AMQP connection did not close within {:?}, dropping it",
                limit
            );
            false
        }
    }
}

/// One connection attempt over all configured addresses.
pub struct AmqpConnector {
    addresses: AmqpAddresses,
    topology: Topology,
}

impl AmqpConnector {
    pub fn new(addresses: AmqpAddresses, topology: Topology) -> Self {
        Self {
            addresses,
            topology,
        }
    }

    async fn open_session(&self, uri: &str) -> Result<AmqpSession, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection.create_channel().await.map_err(channel_error)?;
        let t = &self.topology;

        channel
            .basic_qos(t.prefetch, BasicQosOptions::default())
            .await
            .map_err(channel_error)?;

        channel
            .queue_declare(
                &t.queue.name,
                QueueDeclareOptions {
                    durable: t.queue.durable,
                    exclusive: t.queue.exclusive,
                    auto_delete: t.queue.auto_delete,
                    ..Default::default()
                },
                to_table(&t.queue.arguments),
            )
            .await
            .map_err(channel_error)?;

        if let Some(exchange) = t.exchange_to_declare() {
            channel
                .exchange_declare(
                    &exchange.name,
                    exchange_kind(&exchange.kind),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        auto_delete: exchange.auto_delete,
                        ..Default::default()
                    },
                    to_table(&exchange.arguments),
                )
                .await
                .map_err(channel_error)?;
        }

        if let Some(ref exchange) = t.exchange {
            channel
                .queue_bind(
                    &t.queue.name,
                    &exchange.name,
                    &t.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(channel_error)?;
        }

        let consumer = channel
            .basic_consume(
                &t.queue.name,
                &t.consumer_tag,
                BasicConsumeOptions {
                    no_ack: t.auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;

        Ok(AmqpSession {
            connection,
            channel,
            consumer,
        })
    }
}

#[async_trait]
impl Connect for AmqpConnector {
    type Handle = Box<dyn BrokerSession>;
    type Error = BrokerError;

    async fn connect(&self) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let mut last_error = BrokerError::Config("no broker addresses configured".to_string());
        for uri in self.addresses.uris() {
            match self.open_session(uri).await {
                Ok(session) => {
                    debug!(
                        "Consuming '{}' on {}",
                        self.topology.queue.name,
                        mask_credentials(uri)
                    );
                    return Ok(Box::new(session));
                }
                Err(e) => {
                    warn!("Broker {} unavailable: {}", mask_credentials(uri), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn describe(&self) -> String {
        self.addresses.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_conversion_preserves_death_count() {
        let mut death = FieldTable::default();
        death.insert("count".into(), AMQPValue::LongLongInt(4));
        death.insert("queue".into(), AMQPValue::LongString("orders".into()));
        let mut headers = FieldTable::default();
        headers.insert(
            "x-death".into(),
            AMQPValue::FieldArray(vec![AMQPValue::FieldTable(death)].into()),
        );

        let converted = from_table(&headers);
        let mut delivery = Delivery::new(1, "x");
        delivery.properties.headers = converted;
        assert_eq!(delivery.first_death_count(), Some(4));
    }

    #[test]
    fn test_outgoing_properties_roundtrip_headers() {
        let mut delivery = Delivery::new(1, "x");
        delivery.properties.correlation_id = Some("c-7".into());
        delivery
            .properties
            .headers
            .insert("tenant".into(), HeaderValue::Str("acme".into()));

        let props = outgoing_properties(&delivery);
        assert_eq!(short(props.correlation_id()), Some("c-7".to_string()));
        let headers = props.headers().as_ref().map(from_table).unwrap();
        assert_eq!(headers["tenant"], HeaderValue::Str("acme".into()));
    }

    #[test]
    fn test_exchange_kinds() {
        assert!(matches!(exchange_kind("fanout"), ExchangeKind::Fanout));
        assert!(matches!(
            exchange_kind("x-delayed-message"),
            ExchangeKind::Custom(ref kind) if kind == "x-delayed-message"
        ));
    }

    #[tokio::test]
    async fn test_close_is_abandoned_when_the_peer_never_answers() {
        let stalled = std::future::pending::<Result<(), String>>();
        assert!(!close_within(stalled, Duration::from_millis(50)).await);

        let refused = async { Err::<(), _>("connection reset".to_string()) };
        assert!(close_within(refused, Duration::from_millis(50)).await);
        assert!(close_within(async { Ok::<(), String>(()) }, Duration::from_millis(50)).await);
    }
}
