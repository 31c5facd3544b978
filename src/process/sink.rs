//! Injection sink: the host seam that receives built messages.

use async_trait::async_trait;
use thiserror::Error;

use super::builder::Body;
use crate::work_queue::Headers;

/// A message ready for injection into a named sequence.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub content_type: String,
    pub body: Body,
    pub headers: Headers,
}

/// Verdict returned by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStatus {
    Accepted,
    Rejected,
    /// The sequence asked for the message to be redelivered later.
    Rollback,
}

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Sequence '{sequence}' timed out after {seconds}s")]
    Timeout { sequence: String, seconds: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait InjectionSink: Send + Sync {
    fn has_sequence(&self, name: &str) -> bool;

    async fn inject(&self, message: &Message, sequence: &str)
        -> Result<InjectStatus, InjectError>;
}
