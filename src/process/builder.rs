//! Message builders keyed by MIME type.
//!
//! Lookup order: exact essence, then `type/*`, then the fallback builder.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::utils::ContentType;

/// Built message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl Body {
    /// Serialized form handed to external consumers.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Body::Text(s) => s.as_bytes().to_vec(),
            Body::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
            Body::Binary(b) => b.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Unsupported charset: {0}")]
    UnsupportedCharset(String),
    #[error("Payload is not valid {charset}: {reason}")]
    Decode { charset: String, reason: String },
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait MessageBuilder: Send + Sync {
    fn build(&self, bytes: &[u8], content_type: &ContentType) -> Result<Body, BuildError>;
}

fn decode_text(bytes: &[u8], charset: Option<&str>) -> Result<String, BuildError> {
    let charset = charset.map(|c| c.to_ascii_lowercase());
    match charset.as_deref() {
        None | Some("utf-8") | Some("utf8") => {
            String::from_utf8(bytes.to_vec()).map_err(|e| BuildError::Decode {
                charset: "utf-8".to_string(),
                reason: e.to_string(),
            })
        }
        Some("us-ascii") | Some("ascii") => {
            if bytes.is_ascii() {
                Ok(bytes.iter().map(|&b| b as char).collect())
            } else {
                Err(BuildError::Decode {
                    charset: "us-ascii".to_string(),
                    reason: "non-ASCII byte".to_string(),
                })
            }
        }
        Some("iso-8859-1") | Some("latin1") | Some("latin-1") => {
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        Some(other) => Err(BuildError::UnsupportedCharset(other.to_string())),
    }
}

/// Decodes text and XML payloads using the declared charset.
pub struct TextBuilder;

impl MessageBuilder for TextBuilder {
    fn build(&self, bytes: &[u8], content_type: &ContentType) -> Result<Body, BuildError> {
        decode_text(bytes, content_type.charset()).map(Body::Text)
    }
}

pub struct JsonBuilder;

impl MessageBuilder for JsonBuilder {
    fn build(&self, bytes: &[u8], content_type: &ContentType) -> Result<Body, BuildError> {
        let text = decode_text(bytes, content_type.charset())?;
        Ok(Body::Json(serde_json::from_str(&text)?))
    }
}

/// Passes bytes through untouched. Used when nothing else matches.
pub struct RawBuilder;

impl MessageBuilder for RawBuilder {
    fn build(&self, bytes: &[u8], _content_type: &ContentType) -> Result<Body, BuildError> {
        Ok(Body::Binary(bytes.to_vec()))
    }
}

pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn MessageBuilder>>,
    fallback: Arc<dyn MessageBuilder>,
}

impl BuilderRegistry {
    pub fn new(fallback: Arc<dyn MessageBuilder>) -> Self {
        Self {
            builders: HashMap::new(),
            fallback,
        }
    }

    /// Text for `text/*` and XML, JSON for `application/json`, raw otherwise.
    pub fn with_defaults() -> Self {
        let text: Arc<dyn MessageBuilder> = Arc::new(TextBuilder);
        let mut registry = Self::new(Arc::new(RawBuilder));
        registry.register("text/*", text.clone());
        registry.register("application/xml", text.clone());
        registry.register("application/soap+xml", text);
        registry.register("application/json", Arc::new(JsonBuilder));
        registry
    }

    pub fn register(&mut self, mime: &str, builder: Arc<dyn MessageBuilder>) {
        self.builders.insert(mime.to_ascii_lowercase(), builder);
    }

    fn lookup(&self, content_type: &ContentType) -> &Arc<dyn MessageBuilder> {
        self.builders
            .get(content_type.essence())
            .or_else(|| {
                self.builders
                    .get(&format!("{}/*", content_type.top_level()))
            })
            .unwrap_or(&self.fallback)
    }

    pub fn build(&self, bytes: &[u8], content_type: &str) -> Result<Body, BuildError> {
        let parsed = ContentType::parse(content_type);
        self.lookup(&parsed).build(bytes, &parsed)
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
