//! Work queue error types.

use thiserror::Error;

use super::connector::ConnectError;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    /// The container or broker could not be reached, even after retries.
    #[error(transparent)]
    Connectivity(#[from] ConnectError),
    #[error("Item already claimed by another consumer")]
    AlreadyClaimed,
    /// The item disappeared between enumeration and claim.
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Container is locked by another node: {0}")]
    ContainerBusy(String),
    /// Move/delete/ack failed after the item was already delivered.
    #[error("Finalization failed for {item}: {reason}")]
    Finalization { item: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl WorkQueueError {
    pub fn finalization(item: impl Into<String>, reason: impl ToString) -> Self {
        WorkQueueError::Finalization {
            item: item.into(),
            reason: reason.to_string(),
        }
    }
}
