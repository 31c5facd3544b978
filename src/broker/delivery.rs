//! Broker deliveries, independent of the client library.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::work_queue::{Headers, Payload};

pub const HEADER_CORRELATION_ID: &str = "rabbitmq.message.correlation.id";
pub const HEADER_MESSAGE_ID: &str = "rabbitmq.message.id";
pub const HEADER_REPLY_TO: &str = "rabbitmq.replyto.name";
pub const HEADER_CONTENT_ENCODING: &str = "rabbitmq.message.content.encoding";
pub const X_DEATH: &str = "x-death";

/// AMQP field value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<HeaderValue>),
    Table(BTreeMap<String, HeaderValue>),
    Void,
}

impl HeaderValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(n) => Some(*n),
            HeaderValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a config value (queue/exchange arguments). Nulls and nested
    /// objects are not representable as declaration arguments.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(HeaderValue::Str(s.clone())),
            serde_json::Value::Bool(b) => Some(HeaderValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(HeaderValue::Int)
                .or_else(|| n.as_f64().map(HeaderValue::Float)),
            serde_json::Value::Array(items) => Some(HeaderValue::Array(
                items.iter().filter_map(HeaderValue::from_json).collect(),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Str(s) => f.write_str(s),
            HeaderValue::Int(n) => write!(f, "{}", n),
            HeaderValue::Float(n) => write!(f, "{}", n),
            HeaderValue::Bool(b) => write!(f, "{}", b),
            HeaderValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            HeaderValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            HeaderValue::Table(table) => {
                let parts: Vec<String> =
                    table.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            HeaderValue::Void => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: Option<String>,
    pub reply_to: Option<String>,
    pub headers: BTreeMap<String, HeaderValue>,
}

/// One entry of the broker's `x-death` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub count: i64,
    pub queue: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    pub properties: DeliveryProperties,
    pub redelivered: bool,
}

impl Delivery {
    pub fn new(tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            body: body.into(),
            properties: DeliveryProperties::default(),
            redelivered: false,
        }
    }

    /// Parsed `x-death` entries, most recent first as the broker writes them.
    pub fn deaths(&self) -> Vec<DeathRecord> {
        let Some(HeaderValue::Array(entries)) = self.properties.headers.get(X_DEATH) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| match entry {
                HeaderValue::Table(table) => Some(DeathRecord {
                    count: table.get("count").and_then(HeaderValue::as_i64).unwrap_or(0),
                    queue: table.get("queue").map(|v| v.to_string()),
                    reason: table.get("reason").map(|v| v.to_string()),
                }),
                _ => None,
            })
            .collect()
    }

    /// Count recorded by the first `x-death` entry only.
    pub fn first_death_count(&self) -> Option<i64> {
        self.deaths().first().map(|d| d.count)
    }
}

#[async_trait]
impl Payload for Delivery {
    fn id(&self) -> String {
        self.properties
            .message_id
            .clone()
            .unwrap_or_else(|| format!("delivery-{}", self.tag))
    }

    fn size(&self) -> u64 {
        self.body.len() as u64
    }

    fn content_type(&self) -> Option<String> {
        self.properties.content_type.clone()
    }

    fn headers(&self) -> Headers {
        let props = &self.properties;
        let mut headers: Headers = props
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        let fixed = [
            (HEADER_CORRELATION_ID, &props.correlation_id),
            (HEADER_MESSAGE_ID, &props.message_id),
            (HEADER_REPLY_TO, &props.reply_to),
            (HEADER_CONTENT_ENCODING, &props.content_encoding),
        ];
        for (key, value) in fixed {
            if let Some(value) = value {
                headers.insert(key.to_string(), value.clone());
            }
        }
        headers
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_deaths(counts: &[i64]) -> Delivery {
        let entries = counts
            .iter()
            .map(|count| {
                let mut table = BTreeMap::new();
                table.insert("count".to_string(), HeaderValue::Int(*count));
                table.insert("queue".to_string(), HeaderValue::Str("orders".into()));
                HeaderValue::Table(table)
            })
            .collect();
        let mut delivery = Delivery::new(1, "x");
        delivery
            .properties
            .headers
            .insert(X_DEATH.to_string(), HeaderValue::Array(entries));
        delivery
    }

    #[test]
    fn test_first_death_count_reads_first_entry_only() {
        let delivery = with_deaths(&[2, 7]);
        assert_eq!(delivery.deaths().len(), 2);
        assert_eq!(delivery.first_death_count(), Some(2));
        assert_eq!(Delivery::new(1, "x").first_death_count(), None);
    }

    #[test]
    fn test_transport_headers() {
        let mut delivery = Delivery::new(9, "body");
        delivery.properties.correlation_id = Some("c-1".into());
        delivery.properties.reply_to = Some("replies".into());
        delivery
            .properties
            .headers
            .insert("tenant".into(), HeaderValue::Int(4));

        let headers = delivery.headers();
        assert_eq!(headers[HEADER_CORRELATION_ID], "c-1");
        assert_eq!(headers[HEADER_REPLY_TO], "replies");
        assert_eq!(headers["tenant"], "4");
        assert!(!headers.contains_key(HEADER_MESSAGE_ID));
        assert_eq!(delivery.id(), "delivery-9");
    }

    #[test]
    fn test_argument_conversion() {
        let value = serde_json::json!(60000);
        assert_eq!(HeaderValue::from_json(&value), Some(HeaderValue::Int(60000)));
        assert_eq!(HeaderValue::from_json(&serde_json::Value::Null), None);
    }
}
