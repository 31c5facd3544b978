//! Broker-backed work queue. Claims are implicit: an unacknowledged
//! delivery is owned by this consumer until it is acked or rejected.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::delivery::Delivery;
use super::session::{BrokerError, BrokerSession};
use crate::work_queue::{
    ClaimId, Connect, Enumeration, FinalAction, Payload, RetryingConnector, WorkHandle,
    WorkQueue, WorkQueueError,
};

pub struct BrokerQueue<C>
where
    C: Connect<Handle = Box<dyn BrokerSession>>,
{
    endpoint: String,
    connector: RetryingConnector<C>,
    session: Option<Box<dyn BrokerSession>>,
    cancel: CancellationToken,
}

impl<C> BrokerQueue<C>
where
    C: Connect<Handle = Box<dyn BrokerSession>>,
{
    pub fn new(
        endpoint: impl Into<String>,
        connector: RetryingConnector<C>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            connector,
            session: None,
            cancel,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Result<&dyn BrokerSession, BrokerError> {
        self.session
            .as_deref()
            .ok_or_else(|| BrokerError::Connection("not connected".to_string()))
    }

    async fn apply(
        &self,
        delivery: &Delivery,
        tag: u64,
        action: FinalAction,
    ) -> Result<(), BrokerError> {
        let session = self.session()?;
        match action {
            FinalAction::Acknowledge => session.ack(tag).await,
            FinalAction::LeaveInPlace => Ok(()),
            FinalAction::Requeue(delay) => {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            debug!("{}: shutdown during requeue delay, leaving {} unacked", self.endpoint, tag);
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                session.reject(tag, true).await
            }
            FinalAction::Reject => session.reject(tag, false).await,
            FinalAction::DeadLetter {
                exchange,
                routing_key,
            } => {
                session.publish(&exchange, &routing_key, delivery).await?;
                session.ack(tag).await
            }
            FinalAction::Discard => {
                warn!("{}: discarding {}", self.endpoint, delivery.id());
                session.ack(tag).await
            }
            other => Err(BrokerError::Channel(format!(
                "{:?} is not applicable to broker deliveries",
                other
            ))),
        }
    }
}

#[async_trait]
impl<C> WorkQueue for BrokerQueue<C>
where
    C: Connect<Handle = Box<dyn BrokerSession>>,
{
    type Item = Delivery;

    async fn open(&mut self) -> Result<(), WorkQueueError> {
        if self.session.is_none() {
            let session = self.connector.connect(&self.cancel).await?;
            info!("{}: connected to {}", self.endpoint, self.connector.target());
            self.session = Some(session);
        }
        Ok(())
    }

    async fn enumerate(&mut self) -> Result<Enumeration<Delivery>, WorkQueueError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Enumeration::Unavailable {
                reason: "not connected".to_string(),
            });
        };

        match session.next_delivery().await {
            Some(Ok(delivery)) => Ok(Enumeration::Single(delivery)),
            Some(Err(e)) => {
                self.session = None;
                Ok(Enumeration::Unavailable {
                    reason: e.to_string(),
                })
            }
            None => {
                self.session = None;
                Ok(Enumeration::Unavailable {
                    reason: "consumer subscription ended".to_string(),
                })
            }
        }
    }

    async fn claim(&self, item: Delivery) -> Result<WorkHandle<Delivery>, WorkQueueError> {
        let label = item.id();
        let tag = item.tag;
        Ok(WorkHandle::new(item, ClaimId::DeliveryTag(tag), label))
    }

    async fn finalize(
        &self,
        handle: WorkHandle<Delivery>,
        action: FinalAction,
    ) -> Result<(), WorkQueueError> {
        let (delivery, claim) = handle.consume();
        let ClaimId::DeliveryTag(tag) = claim else {
            return Err(WorkQueueError::Other(format!(
                "{} was not claimed from a broker",
                delivery.id()
            )));
        };
        self.apply(&delivery, tag, action)
            .await
            .map_err(|e| WorkQueueError::finalization(delivery.id(), e))
    }

    async fn release(&self, handle: WorkHandle<Delivery>) -> Result<(), WorkQueueError> {
        let (delivery, claim) = handle.consume();
        if let ClaimId::DeliveryTag(tag) = claim {
            self.session()
                .map_err(|e| WorkQueueError::Other(e.to_string()))?
                .reject(tag, true)
                .await
                .map_err(|e| WorkQueueError::finalization(delivery.id(), e))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort().await;
            info!("{}: connection closed", self.endpoint);
        }
    }
}
