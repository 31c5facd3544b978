//! One task per endpoint, all sharing a cancellation token.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::ConsumerLoop;
use crate::config::{Config, ConfigError, EndpointConfig};
use crate::endpoint::{build_file_endpoint, EndpointContext};
use crate::work_queue::{CycleStatus, OutcomeResolver, PollCycle, WorkQueue};

/// How an endpoint task ended.
#[derive(Debug)]
pub struct EndpointExit {
    pub name: String,
    pub result: Result<(), String>,
}

pub struct Supervisor {
    tasks: JoinSet<EndpointExit>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Start every endpoint in `config`, or only those named in `only`.
    /// An endpoint with an invalid configuration is logged and not started;
    /// the others still run.
    pub fn start(
        config: &Config,
        ctx: &EndpointContext,
        only: &[String],
    ) -> Result<Self, ConfigError> {
        for name in only {
            config.endpoint(name)?;
        }

        let mut supervisor = Self::new(ctx.cancel.clone());
        for endpoint in &config.endpoints {
            if !only.is_empty() && !only.iter().any(|n| n == endpoint.name()) {
                continue;
            }
            if let Err(e) = endpoint
                .validate(&config.sequences)
                .and_then(|()| supervisor.spawn_endpoint(endpoint, ctx))
            {
                error!("Not starting endpoint: {}", e);
            }
        }
        Ok(supervisor)
    }

    fn spawn_endpoint(
        &mut self,
        endpoint: &EndpointConfig,
        ctx: &EndpointContext,
    ) -> Result<(), ConfigError> {
        match endpoint {
            EndpointConfig::File(c) => {
                self.spawn_poller(build_file_endpoint(c, ctx)?);
                Ok(())
            }
            #[cfg(feature = "amqp-broker")]
            EndpointConfig::Rabbitmq(c) => {
                self.spawn_consumer(crate::endpoint::build_rabbitmq_endpoint(c, ctx)?);
                Ok(())
            }
            #[cfg(not(feature = "amqp-broker"))]
            EndpointConfig::Rabbitmq(c) => Err(ConfigError::Invalid {
                endpoint: c.name.clone(),
                reason: "built without the amqp-broker feature".to_string(),
            }),
        }
    }

    /// Run cycles back to back, each starting no earlier than one interval
    /// after the previous start. Overrun ticks are skipped, not queued.
    pub fn spawn_poller<Q, R>(&mut self, mut poller: PollCycle<Q, R>)
    where
        Q: WorkQueue + 'static,
        R: OutcomeResolver<Q::Item> + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let name = poller.name().to_string();
            info!("{}: poller started", name);
            loop {
                let report = poller.execute().await;
                if report.status == CycleStatus::Cancelled {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poller.until_due()) => {}
                }
            }
            info!("{}: poller stopped", name);
            EndpointExit { name, result: Ok(()) }
        });
    }

    pub fn spawn_consumer<Q, R>(&mut self, consumer: ConsumerLoop<Q, R>)
    where
        Q: WorkQueue + 'static,
        R: OutcomeResolver<Q::Item> + 'static,
    {
        self.tasks.spawn(async move {
            let name = consumer.name().to_string();
            let result = consumer.run().await.map(|_| ()).map_err(|e| e.to_string());
            EndpointExit { name, result }
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next endpoint to stop on its own.
    pub async fn join_next(&mut self) -> Option<EndpointExit> {
        loop {
            match self.tasks.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(e) => warn!("Endpoint task failed: {}", e),
            }
        }
    }

    /// Cancel every endpoint and wait for all of them to stop.
    pub async fn shutdown(mut self) -> Vec<EndpointExit> {
        self.cancel.cancel();
        let mut exits = Vec::new();
        while let Some(exit) = self.join_next().await {
            exits.push(exit);
        }
        exits
    }
}
