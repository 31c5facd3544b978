//! Poll cycle driver: connect → enumerate → {claim → process → finalize}.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::connector::ConnectError;
use super::{Enumeration, Outcome, OutcomeResolver, Payload, WorkHandle, WorkQueue, WorkQueueError};
use crate::process::Processor;

/// Bounds on the work done in a single cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    /// Pause between consecutive items.
    pub item_interval: Option<Duration>,
    /// Stop after this many items have been processed.
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CycleStatus {
    #[default]
    Completed,
    /// The previous cycle started less than one interval ago.
    NotDue,
    Unavailable(String),
    /// Another node holds the container-level lock.
    ContainerBusy,
    Cancelled,
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items another consumer already held, or that vanished before claim.
    pub unclaimed: usize,
    /// Fail-marked items whose recorded disposition was applied.
    pub recovered: usize,
    pub finalization_errors: usize,
    /// The per-cycle item cap ended the cycle early.
    pub capped: bool,
}

impl CycleReport {
    fn with_status(status: CycleStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    fn record(&mut self, settled: &Settled) {
        match settled.outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::TransientFailure(_) | Outcome::PermanentFailure(_) => self.failed += 1,
        }
        if settled.finalized.is_err() {
            self.finalization_errors += 1;
        }
    }
}

/// Outcome of one item after finalization.
#[derive(Debug)]
pub struct Settled {
    pub outcome: Outcome,
    pub finalized: Result<(), WorkQueueError>,
}

/// Process a claimed item, resolve its outcome and settle it exactly once.
pub async fn settle_item<Q, R>(
    queue: &Q,
    processor: &Processor,
    resolver: &R,
    handle: WorkHandle<Q::Item>,
) -> Settled
where
    Q: WorkQueue,
    R: OutcomeResolver<Q::Item>,
{
    let id = handle.item.id();
    let outcome = processor.process(&handle.item).await;
    let action = resolver.resolve(&handle.item, &outcome);
    debug!("{}: {:?} -> {:?}", id, outcome, action);

    let finalized = queue.finalize(handle, action).await;
    if let Err(ref e) = finalized {
        error!("{}", e);
    }
    Settled { outcome, finalized }
}

/// Drives one endpoint's queue on each scheduler tick.
pub struct PollCycle<Q, R> {
    name: String,
    queue: Q,
    resolver: R,
    processor: Arc<Processor>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    throttle: Throttle,
    cancel: CancellationToken,
    last_run: Option<DateTime<Utc>>,
}

impl<Q, R> PollCycle<Q, R>
where
    Q: WorkQueue,
    R: OutcomeResolver<Q::Item>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        queue: Q,
        resolver: R,
        processor: Arc<Processor>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        throttle: Throttle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            resolver,
            processor,
            clock,
            interval,
            throttle,
            cancel,
            last_run: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Time left until the next cycle may start.
    pub fn until_due(&self) -> Duration {
        let Some(last) = self.last_run else {
            return Duration::ZERO;
        };
        let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
        self.interval.saturating_sub(elapsed)
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.interval),
        }
    }

    /// Run one cycle. A tick that arrives before `last_run + interval` is a
    /// no-op. `last_run` is stamped before any work so that a failed cycle
    /// never delays the next scheduled one.
    pub async fn execute(&mut self) -> CycleReport {
        let now = self.clock.now();
        if !self.is_due(now) {
            debug!("{}: previous cycle still within interval, skipping tick", self.name);
            return CycleReport::with_status(CycleStatus::NotDue);
        }
        self.last_run = Some(now);

        match self.queue.open().await {
            Ok(()) => {}
            Err(WorkQueueError::ContainerBusy(owner)) => {
                debug!("{}: container held by {}, skipping cycle", self.name, owner);
                return CycleReport::with_status(CycleStatus::ContainerBusy);
            }
            Err(WorkQueueError::Connectivity(ConnectError::Cancelled { .. })) => {
                return CycleReport::with_status(CycleStatus::Cancelled);
            }
            Err(e) => {
                error!("{}: {}", self.name, e);
                return CycleReport::with_status(CycleStatus::Unavailable(e.to_string()));
            }
        }

        let report = self.run_items().await;
        self.queue.close().await;

        if report.processed() > 0 || report.recovered > 0 {
            info!(
                "{}: cycle finished ({} succeeded, {} failed, {} skipped)",
                self.name, report.succeeded, report.failed, report.skipped
            );
        }
        report
    }

    async fn run_items(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let items = match self.queue.enumerate().await {
            Ok(Enumeration::Unavailable { reason }) => {
                warn!("{}: container unavailable: {}", self.name, reason);
                report.status = CycleStatus::Unavailable(reason);
                return report;
            }
            Ok(listing) => listing.into_items(),
            Err(e) => {
                warn!("{}: enumeration failed: {}", self.name, e);
                report.status = CycleStatus::Unavailable(e.to_string());
                return report;
            }
        };

        let mut processed = 0usize;
        for item in items {
            if self.cancel.is_cancelled() {
                report.status = CycleStatus::Cancelled;
                break;
            }

            if let Some(max) = self.throttle.max_items {
                if processed >= max {
                    info!("{}: processed {} items, deferring the rest", self.name, max);
                    report.capped = true;
                    break;
                }
            }

            if item.is_fail_marked() {
                let id = item.id();
                match self.queue.recover_failed(item).await {
                    Ok(true) => report.recovered += 1,
                    Ok(false) => debug!("{}: {} is fail-marked, skipping", self.name, id),
                    Err(e) => {
                        warn!("{}: could not recover {}: {}", self.name, id, e);
                        report.finalization_errors += 1;
                    }
                }
                continue;
            }

            if processed > 0 {
                if let Some(pause) = self.throttle.item_interval {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            report.status = CycleStatus::Cancelled;
                            break;
                        }
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }

            let id = item.id();
            let handle = match self.queue.claim(item).await {
                Ok(handle) => handle,
                Err(WorkQueueError::AlreadyClaimed) => {
                    debug!("{}: {} already claimed, skipping", self.name, id);
                    report.unclaimed += 1;
                    continue;
                }
                Err(WorkQueueError::NotFound(_)) => {
                    warn!("{}: {} vanished before claim, skipping", self.name, id);
                    report.unclaimed += 1;
                    continue;
                }
                Err(e) => {
                    warn!("{}: could not claim {}: {}", self.name, id, e);
                    report.unclaimed += 1;
                    continue;
                }
            };

            let settled = settle_item(&self.queue, &self.processor, &self.resolver, handle).await;
            processed += 1;
            report.record(&settled);
        }

        report
    }
}
