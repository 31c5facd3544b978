//! Processor: builds a message from a claimed item and injects it.
//!
//! The processor never touches storage. It only reads the item's content
//! and maps the sink's verdict into an `Outcome`.

pub mod builder;
pub mod command;
pub mod sink;

pub use builder::{Body, BuildError, BuilderRegistry, MessageBuilder};
pub use command::{CommandSink, SequenceConfig};
pub use sink::{InjectError, InjectStatus, InjectionSink, Message};

use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::work_queue::{Outcome, Payload, SkipReason};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct Processor {
    endpoint: String,
    sequence: String,
    on_error_sequence: Option<String>,
    size_limit: Option<u64>,
    content_type: Option<String>,
    builders: Arc<BuilderRegistry>,
    sink: Arc<dyn InjectionSink>,
}

impl Processor {
    pub fn new(
        endpoint: impl Into<String>,
        sequence: impl Into<String>,
        builders: Arc<BuilderRegistry>,
        sink: Arc<dyn InjectionSink>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            sequence: sequence.into(),
            on_error_sequence: None,
            size_limit: None,
            content_type: None,
            builders,
            sink,
        }
    }

    pub fn with_on_error_sequence(mut self, sequence: Option<String>) -> Self {
        self.on_error_sequence = sequence;
        self
    }

    /// Negative limits mean unlimited.
    pub fn with_size_limit(mut self, limit: i64) -> Self {
        self.size_limit = u64::try_from(limit).ok();
        self
    }

    /// Content type used when the item declares none.
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub async fn process<P: Payload + ?Sized>(&self, item: &P) -> Outcome {
        let id = item.id();

        if let Some(limit) = self.size_limit {
            if item.size() > limit {
                warn!(
                    "{}: {} is {} bytes, over the {} byte limit; leaving it in place",
                    self.endpoint,
                    id,
                    item.size(),
                    limit
                );
                return Outcome::Skipped(SkipReason::SizeLimitExceeded);
            }
        }

        if !self.sink.has_sequence(&self.sequence) {
            error!(
                "{}: sequence '{}' not found; leaving {} in place",
                self.endpoint, self.sequence, id
            );
            return Outcome::Skipped(SkipReason::SequenceNotFound);
        }

        let bytes = match item.read().await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "{}: {} was taken by another process before it could be read",
                    self.endpoint, id
                );
                return Outcome::Skipped(SkipReason::Vanished);
            }
            Err(e) => {
                warn!("{}: cannot read {}: {}", self.endpoint, id, e);
                return Outcome::Skipped(SkipReason::Unreadable);
            }
        };

        let content_type = item
            .content_type()
            .or_else(|| self.content_type.clone())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let body = match self.builders.build(&bytes, &content_type) {
            Ok(body) => body,
            Err(e) => {
                let reason = format!("cannot build message from {}: {}", id, e);
                error!("{}: {}", self.endpoint, reason);
                return Outcome::PermanentFailure(reason);
            }
        };

        let message = Message {
            id: id.clone(),
            content_type,
            body,
            headers: item.headers(),
        };

        let outcome = match self.sink.inject(&message, &self.sequence).await {
            Ok(InjectStatus::Accepted) => Outcome::Success,
            Ok(InjectStatus::Rejected) => {
                Outcome::PermanentFailure(format!("{} rejected by '{}'", id, self.sequence))
            }
            Ok(InjectStatus::Rollback) => {
                Outcome::TransientFailure(format!("'{}' rolled back {}", self.sequence, id))
            }
            Err(e) => Outcome::PermanentFailure(format!("injecting {} failed: {}", id, e)),
        };

        if outcome.is_failure() {
            self.run_on_error(&message).await;
        }
        outcome
    }

    async fn run_on_error(&self, message: &Message) {
        let Some(ref sequence) = self.on_error_sequence else {
            return;
        };
        match self.sink.inject(message, sequence).await {
            Ok(status) => info!(
                "{}: on-error sequence '{}' returned {:?} for {}",
                self.endpoint, sequence, status, message.id
            ),
            Err(e) => warn!(
                "{}: on-error sequence '{}' failed for {}: {}",
                self.endpoint, sequence, message.id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::work_queue::Headers;

    struct Item {
        size: u64,
        body: Option<Vec<u8>>,
        content_type: Option<String>,
    }

    #[async_trait]
    impl Payload for Item {
        fn id(&self) -> String {
            "item".to_string()
        }
        fn size(&self) -> u64 {
            self.size
        }
        fn content_type(&self) -> Option<String> {
            self.content_type.clone()
        }
        fn headers(&self) -> Headers {
            Headers::new()
        }
        async fn read(&self) -> std::io::Result<Vec<u8>> {
            self.body
                .clone()
                .ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))
        }
    }

    fn item(body: &str) -> Item {
        Item {
            size: body.len() as u64,
            body: Some(body.as_bytes().to_vec()),
            content_type: Some("text/plain".to_string()),
        }
    }

    struct ScriptedSink {
        status: Result<InjectStatus, ()>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedSink {
        fn new(status: Result<InjectStatus, ()>) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InjectionSink for ScriptedSink {
        fn has_sequence(&self, name: &str) -> bool {
            name == "main" || name == "fault"
        }

        async fn inject(
            &self,
            message: &Message,
            sequence: &str,
        ) -> Result<InjectStatus, InjectError> {
            self.calls
                .lock()
                .unwrap()
                .push((sequence.to_string(), message.content_type.clone()));
            self.status
                .map_err(|_| InjectError::SequenceNotFound(sequence.to_string()))
        }
    }

    fn processor(sink: Arc<ScriptedSink>) -> Processor {
        Processor::new("test", "main", Arc::new(BuilderRegistry::with_defaults()), sink)
    }

    #[tokio::test]
    async fn test_accepted_is_success() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let outcome = processor(sink.clone()).process(&item("hello")).await;
        assert_eq!(outcome, Outcome::Success);
        assert_eq!(sink.calls(), vec![("main".to_string(), "text/plain".to_string())]);
    }

    #[tokio::test]
    async fn test_size_limit_skips_without_injecting() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let p = processor(sink.clone()).with_size_limit(100);
        let big = Item {
            size: 101,
            body: Some(vec![b'x'; 101]),
            content_type: None,
        };
        assert_eq!(
            p.process(&big).await,
            Outcome::Skipped(SkipReason::SizeLimitExceeded)
        );
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sequence_skips() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let p = Processor::new(
            "test",
            "nowhere",
            Arc::new(BuilderRegistry::with_defaults()),
            sink.clone(),
        );
        assert_eq!(
            p.process(&item("x")).await,
            Outcome::Skipped(SkipReason::SequenceNotFound)
        );
    }

    #[tokio::test]
    async fn test_vanished_item_skips() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let gone = Item {
            size: 1,
            body: None,
            content_type: None,
        };
        assert_eq!(
            processor(sink).process(&gone).await,
            Outcome::Skipped(SkipReason::Vanished)
        );
    }

    #[tokio::test]
    async fn test_rollback_is_transient_and_runs_fault_sequence() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Rollback));
        let p = processor(sink.clone()).with_on_error_sequence(Some("fault".to_string()));
        let outcome = p.process(&item("x")).await;
        assert!(matches!(outcome, Outcome::TransientFailure(_)));
        let sequences: Vec<String> = sink.calls().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sequences, vec!["main", "fault"]);
    }

    #[tokio::test]
    async fn test_sink_error_is_permanent() {
        let sink = ScriptedSink::new(Err(()));
        let outcome = processor(sink).process(&item("x")).await;
        assert!(matches!(outcome, Outcome::PermanentFailure(_)));
    }

    #[tokio::test]
    async fn test_build_error_is_permanent() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let bad = Item {
            size: 3,
            body: Some(b"{x".to_vec()),
            content_type: Some("application/json".to_string()),
        };
        assert!(matches!(
            processor(sink.clone()).process(&bad).await,
            Outcome::PermanentFailure(_)
        ));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_content_type() {
        let sink = ScriptedSink::new(Ok(InjectStatus::Accepted));
        let p = processor(sink.clone()).with_content_type(Some("application/xml".to_string()));
        let untyped = Item {
            size: 4,
            body: Some(b"<a/>".to_vec()),
            content_type: None,
        };
        p.process(&untyped).await;
        assert_eq!(sink.calls()[0].1, "application/xml");
    }
}
