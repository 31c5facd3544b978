//! Push-driven consumer loop for broker endpoints.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::process::Processor;
use crate::work_queue::{
    settle_item, ConnectError, Enumeration, Outcome, OutcomeResolver, WorkQueue, WorkQueueError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub finalization_errors: usize,
    /// Times the connection dropped and was re-established.
    pub reconnects: usize,
}

impl ConsumerStats {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Consumes deliveries one at a time until cancelled or the connection
/// cannot be re-established.
pub struct ConsumerLoop<Q, R> {
    name: String,
    queue: Q,
    resolver: R,
    processor: Arc<Processor>,
    cancel: CancellationToken,
}

impl<Q, R> ConsumerLoop<Q, R>
where
    Q: WorkQueue,
    R: OutcomeResolver<Q::Item>,
{
    pub fn new(
        name: impl Into<String>,
        queue: Q,
        resolver: R,
        processor: Arc<Processor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            resolver,
            processor,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(mut self) -> Result<ConsumerStats, WorkQueueError> {
        let mut stats = ConsumerStats::default();
        let mut connected_once = false;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.queue.open().await {
                Ok(()) => connected_once = true,
                Err(WorkQueueError::Connectivity(ConnectError::Cancelled { .. })) => break,
                Err(e) => {
                    error!("{}: giving up: {}", self.name, e);
                    self.queue.close().await;
                    return Err(e);
                }
            }

            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.queue.enumerate() => next,
            };

            let items = match next {
                Ok(Enumeration::Unavailable { reason }) => {
                    warn!("{}: connection lost ({}), reconnecting", self.name, reason);
                    if connected_once {
                        stats.reconnects += 1;
                    }
                    continue;
                }
                Ok(listing) => listing.into_items(),
                Err(e) => {
                    warn!("{}: {}", self.name, e);
                    continue;
                }
            };

            for item in items {
                let handle = match self.queue.claim(item).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("{}: could not claim delivery: {}", self.name, e);
                        continue;
                    }
                };
                let settled =
                    settle_item(&self.queue, &self.processor, &self.resolver, handle).await;
                match settled.outcome {
                    Outcome::Success => stats.succeeded += 1,
                    Outcome::Skipped(_) => stats.skipped += 1,
                    Outcome::TransientFailure(_) | Outcome::PermanentFailure(_) => {
                        stats.failed += 1
                    }
                }
                if settled.finalized.is_err() {
                    stats.finalization_errors += 1;
                }
            }
        }

        debug!("{}: shutting down consumer", self.name);
        self.queue.close().await;
        info!(
            "{}: consumer stopped after {} deliveries",
            self.name,
            stats.processed()
        );
        Ok(stats)
    }
}
