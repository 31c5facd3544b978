//! Work queue abstraction for the claim → process → finalize lifecycle.
//!
//! File polling and broker consumption follow the same pattern: ensure the
//! container is reachable, obtain candidate items, claim each one, hand it
//! to the processor, resolve the outcome into a final action and apply it.
//! The file case pulls a batch per scheduled cycle; the broker case yields
//! one pushed delivery at a time through the same `enumerate()` call.

pub mod clock;
pub mod connector;
mod error;
mod handle;
pub mod runner;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connector::{Connect, ConnectError, RetryPolicy, RetryingConnector};
pub use error::WorkQueueError;
pub use handle::{ClaimId, WorkHandle};
pub use runner::{settle_item, CycleReport, CycleStatus, PollCycle, Throttle};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Metadata attached to every processed item (transport headers).
pub type Headers = BTreeMap<String, String>;

/// A unit of work as seen by the processor.
#[async_trait]
pub trait Payload: Send + Sync {
    /// Identifier used in logs and for placeholder expansion.
    fn id(&self) -> String;

    fn size(&self) -> u64;

    /// Declared or sniffed content type, parameters included.
    fn content_type(&self) -> Option<String>;

    fn headers(&self) -> Headers;

    /// Read the full content. Opened lazily, only after the item is claimed.
    async fn read(&self) -> std::io::Result<Vec<u8>>;

    /// Whether a durable fail record exists for this item.
    fn is_fail_marked(&self) -> bool {
        false
    }
}

/// Result of listing a container.
#[derive(Debug)]
pub enum Enumeration<T> {
    /// The container URI resolved to one item rather than a directory.
    Single(T),
    Container(Vec<T>),
    /// The container could not be opened. Distinct from an empty container.
    Unavailable { reason: String },
}

impl<T> Enumeration<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Enumeration::Single(item) => vec![item],
            Enumeration::Container(items) => items,
            Enumeration::Unavailable { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SizeLimitExceeded,
    SequenceNotFound,
    /// The item was taken by another process after it was listed.
    Vanished,
    Unreadable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::SizeLimitExceeded => "size limit exceeded",
            SkipReason::SequenceNotFound => "injection sequence not found",
            SkipReason::Vanished => "item vanished",
            SkipReason::Unreadable => "item unreadable",
        };
        f.write_str(s)
    }
}

/// What happened when an item was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Left untouched so a later, valid configuration can reprocess it.
    Skipped(SkipReason),
    /// The sink asked for a rollback; worth retrying later.
    TransientFailure(String),
    PermanentFailure(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::TransientFailure(_) | Outcome::PermanentFailure(_)
        )
    }
}

/// How a processed item is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAction {
    /// Move to the fully resolved destination path.
    MoveToSuccess { destination: PathBuf },
    MoveToFailure { destination: PathBuf },
    Delete,
    /// Write a durable fail record so future cycles skip the item.
    MarkFailed,
    LeaveInPlace,
    Acknowledge,
    /// Negative acknowledgement with requeue after the given delay.
    Requeue(Duration),
    /// Negative acknowledgement without requeue; the broker's own
    /// dead-letter exchange (if any) takes the message.
    Reject,
    /// Republish to the error exchange, then acknowledge the original.
    DeadLetter {
        exchange: String,
        routing_key: String,
    },
    /// Acknowledge and drop, logged.
    Discard,
}

/// Decides the final action for a processed item.
pub trait OutcomeResolver<I>: Send + Sync {
    fn resolve(&self, item: &I, outcome: &Outcome) -> FinalAction;
}

/// A queue that manages connectivity and the claim lifecycle for one endpoint.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    type Item: Payload;

    /// Ensure the container is reachable, retrying per the endpoint policy.
    async fn open(&mut self) -> Result<(), WorkQueueError>;

    /// List candidate items, or wait for the next pushed delivery.
    async fn enumerate(&mut self) -> Result<Enumeration<Self::Item>, WorkQueueError>;

    /// Claim an item for exclusive processing.
    ///
    /// Returns `WorkQueueError::AlreadyClaimed` if another consumer holds it.
    async fn claim(&self, item: Self::Item) -> Result<WorkHandle<Self::Item>, WorkQueueError>;

    /// Apply the resolved action and release the claim.
    async fn finalize(
        &self,
        handle: WorkHandle<Self::Item>,
        action: FinalAction,
    ) -> Result<(), WorkQueueError>;

    /// Give the item back without settling it.
    async fn release(&self, handle: WorkHandle<Self::Item>) -> Result<(), WorkQueueError>;

    /// Re-attempt the recorded disposition of a fail-marked item without
    /// reprocessing it. Returns true if the item was settled.
    async fn recover_failed(&self, _item: Self::Item) -> Result<bool, WorkQueueError> {
        Ok(false)
    }

    /// Drop per-cycle resources (container locks, broker connections).
    async fn close(&mut self);
}
