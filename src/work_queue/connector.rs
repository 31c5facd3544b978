//! Connection establishment with fixed-interval retry.
//!
//! The same routine is used at startup and whenever an established
//! connection drops; there is no separate reconnect path.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A single connection attempt against an external resource.
#[async_trait]
pub trait Connect: Send + Sync {
    type Handle: Send;
    type Error: Display + Send;

    async fn connect(&self) -> Result<Self::Handle, Self::Error>;

    /// Human readable target with credentials masked.
    fn describe(&self) -> String;
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Could not connect to {target} after {attempts} attempt(s): {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },
    #[error("Connection to {target} cancelled")]
    Cancelled { target: String },
}

/// How many times to retry and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. `None` retries forever.
    pub max_retries: Option<u32>,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Build from the configuration convention where a negative count means
    /// "retry indefinitely".
    pub fn from_config(retry_count: i64, interval_ms: u64) -> Self {
        let max_retries = if retry_count < 0 {
            None
        } else {
            Some(u32::try_from(retry_count).unwrap_or(u32::MAX))
        };
        Self {
            max_retries,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
            interval: Duration::ZERO,
        }
    }
}

pub struct RetryingConnector<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Connect> RetryingConnector<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn target(&self) -> String {
        self.inner.describe()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Connect, retrying on failure until the policy is exhausted or the
    /// token is cancelled. Cancellation during the wait aborts immediately.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<C::Handle, ConnectError> {
        let target = self.inner.describe();
        let mut retries: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ConnectError::Cancelled { target });
            }

            match self.inner.connect().await {
                Ok(handle) => {
                    if retries > 0 {
                        info!("Connected to {} after {} retries", target, retries);
                    } else {
                        debug!("Connected to {}", target);
                    }
                    return Ok(handle);
                }
                Err(e) => {
                    let exhausted = self
                        .policy
                        .max_retries
                        .is_some_and(|max| retries >= max);
                    if exhausted {
                        return Err(ConnectError::Exhausted {
                            target,
                            attempts: retries + 1,
                            last_error: e.to_string(),
                        });
                    }

                    retries += 1;
                    warn!(
                        "Connection attempt {} to {} failed: {}. Retrying in {:?}",
                        retries, target, e, self.policy.interval
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ConnectError::Cancelled { target });
                        }
                        _ = tokio::time::sleep(self.policy.interval) => {}
                    }
                }
            }
        }
    }
}
