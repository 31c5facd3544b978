//! Wiring from endpoint configuration to running queues.

mod file;
#[cfg(feature = "amqp-broker")]
mod rabbitmq;

pub use file::{build_file_endpoint, FilePoller};
#[cfg(feature = "amqp-broker")]
pub use rabbitmq::{build_rabbitmq_endpoint, AmqpConsumer};

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::process::{BuilderRegistry, InjectionSink, Processor};
use crate::work_queue::{Clock, SystemClock};

/// Shared services every endpoint is built from.
#[derive(Clone)]
pub struct EndpointContext {
    /// Lock owner identity.
    pub node_id: String,
    /// Relative container paths resolve against this directory.
    pub base_dir: PathBuf,
    pub sink: Arc<dyn InjectionSink>,
    pub builders: Arc<BuilderRegistry>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
}

impl EndpointContext {
    pub fn new(
        node_id: impl Into<String>,
        base_dir: PathBuf,
        sink: Arc<dyn InjectionSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            base_dir,
            sink,
            builders: Arc::new(BuilderRegistry::with_defaults()),
            clock: Arc::new(SystemClock),
            cancel,
        }
    }

    /// Context for `config`, resolving paths against `base_dir`.
    pub fn from_config(
        config: &Config,
        base_dir: PathBuf,
        sink: Arc<dyn InjectionSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(config.node_id(), base_dir, sink, cancel)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn processor(
        &self,
        endpoint: &str,
        sequence: &str,
        on_error_sequence: Option<&str>,
        size_limit: i64,
        content_type: Option<&str>,
    ) -> Processor {
        Processor::new(endpoint, sequence, self.builders.clone(), self.sink.clone())
            .with_on_error_sequence(on_error_sequence.map(str::to_string))
            .with_size_limit(size_limit)
            .with_content_type(content_type.map(str::to_string))
    }
}

fn invalid(endpoint: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}
