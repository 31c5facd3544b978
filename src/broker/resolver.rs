//! Acknowledgement policy for broker deliveries.

use std::time::Duration;

use tracing::{info, warn};

use super::delivery::Delivery;
use crate::config::RabbitmqEndpointConfig;
use crate::work_queue::{FinalAction, Outcome, OutcomeResolver, Payload};

#[derive(Debug, Clone, Default)]
pub struct DeliveryPolicy {
    pub auto_ack: bool,
    /// Pause before a rolled-back delivery is requeued.
    pub requeue_delay: Duration,
    /// Ceiling on the first `x-death` count. `None` disables the check.
    pub max_dead_lettered_count: Option<i64>,
    pub error_exchange: Option<String>,
    pub error_routing_key: Option<String>,
}

impl DeliveryPolicy {
    pub fn from_config(config: &RabbitmqEndpointConfig) -> Self {
        Self {
            auto_ack: config.auto_ack,
            requeue_delay: Duration::from_millis(config.requeue_delay_ms),
            max_dead_lettered_count: None,
            error_exchange: config.error_exchange.clone(),
            error_routing_key: config.error_routing_key.clone(),
        }
        .with_max_dead_lettered_count(config.max_dead_lettered_count)
    }

    /// Negative ceilings disable the check.
    pub fn with_max_dead_lettered_count(mut self, max: i64) -> Self {
        self.max_dead_lettered_count = (max >= 0).then_some(max);
        self
    }
}

pub struct DeliveryResolver {
    endpoint: String,
    policy: DeliveryPolicy,
}

impl DeliveryResolver {
    pub fn new(endpoint: impl Into<String>, policy: DeliveryPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
        }
    }

    /// Terminal failure: reject again below the ceiling, otherwise
    /// republish to the error exchange or discard.
    fn on_permanent_failure(&self, delivery: &Delivery) -> FinalAction {
        let (Some(max), Some(count)) = (
            self.policy.max_dead_lettered_count,
            delivery.first_death_count(),
        ) else {
            return FinalAction::Reject;
        };

        if count < max {
            return FinalAction::Reject;
        }

        match self.policy.error_routing_key {
            Some(ref routing_key) => {
                let exchange = self.policy.error_exchange.clone().unwrap_or_default();
                info!(
                    "{}: {} dead-lettered {} times, republishing to '{}' with key '{}'",
                    self.endpoint,
                    delivery.id(),
                    count,
                    exchange,
                    routing_key
                );
                FinalAction::DeadLetter {
                    exchange,
                    routing_key: routing_key.clone(),
                }
            }
            None => {
                warn!(
                    "{}: {} dead-lettered {} times and no error routing key is set, discarding",
                    self.endpoint,
                    delivery.id(),
                    count
                );
                FinalAction::Discard
            }
        }
    }
}

impl OutcomeResolver<Delivery> for DeliveryResolver {
    fn resolve(&self, delivery: &Delivery, outcome: &Outcome) -> FinalAction {
        if self.policy.auto_ack {
            if outcome.is_failure() {
                warn!(
                    "{}: {} failed but was already auto-acknowledged",
                    self.endpoint,
                    delivery.id()
                );
            }
            return FinalAction::LeaveInPlace;
        }

        match outcome {
            Outcome::Success => FinalAction::Acknowledge,
            Outcome::Skipped(_) | Outcome::TransientFailure(_) => {
                FinalAction::Requeue(self.policy.requeue_delay)
            }
            Outcome::PermanentFailure(_) => self.on_permanent_failure(delivery),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::delivery::{HeaderValue, X_DEATH};
    use crate::work_queue::SkipReason;
    use std::collections::BTreeMap;

    fn with_death_count(count: i64) -> Delivery {
        let mut table = BTreeMap::new();
        table.insert("count".to_string(), HeaderValue::Int(count));
        let mut delivery = Delivery::new(1, "x");
        delivery.properties.headers.insert(
            X_DEATH.to_string(),
            HeaderValue::Array(vec![HeaderValue::Table(table)]),
        );
        delivery
    }

    fn failed() -> Outcome {
        Outcome::PermanentFailure("rejected".to_string())
    }

    fn resolver(policy: DeliveryPolicy) -> DeliveryResolver {
        DeliveryResolver::new("test", policy)
    }

    #[test]
    fn test_success_acknowledges() {
        let r = resolver(DeliveryPolicy::default());
        assert_eq!(
            r.resolve(&Delivery::new(1, "x"), &Outcome::Success),
            FinalAction::Acknowledge
        );
    }

    #[test]
    fn test_auto_ack_leaves_everything() {
        let r = resolver(DeliveryPolicy {
            auto_ack: true,
            ..Default::default()
        });
        assert_eq!(
            r.resolve(&Delivery::new(1, "x"), &failed()),
            FinalAction::LeaveInPlace
        );
    }

    #[test]
    fn test_rollback_requeues_after_delay() {
        let r = resolver(DeliveryPolicy {
            requeue_delay: Duration::from_millis(250),
            ..Default::default()
        });
        assert_eq!(
            r.resolve(&Delivery::new(1, "x"), &Outcome::TransientFailure("later".into())),
            FinalAction::Requeue(Duration::from_millis(250))
        );
        assert_eq!(
            r.resolve(
                &Delivery::new(1, "x"),
                &Outcome::Skipped(SkipReason::SequenceNotFound)
            ),
            FinalAction::Requeue(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_dead_letter_ceiling() {
        let policy = DeliveryPolicy {
            error_exchange: Some("errors".into()),
            error_routing_key: Some("orders.dead".into()),
            ..Default::default()
        }
        .with_max_dead_lettered_count(3);
        let r = resolver(policy);

        assert_eq!(r.resolve(&with_death_count(2), &failed()), FinalAction::Reject);
        assert_eq!(
            r.resolve(&with_death_count(3), &failed()),
            FinalAction::DeadLetter {
                exchange: "errors".into(),
                routing_key: "orders.dead".into()
            }
        );
    }

    #[test]
    fn test_ceiling_without_routing_key_discards() {
        let r = resolver(DeliveryPolicy::default().with_max_dead_lettered_count(3));
        assert_eq!(r.resolve(&with_death_count(3), &failed()), FinalAction::Discard);
    }

    #[test]
    fn test_default_exchange_when_only_routing_key() {
        let policy = DeliveryPolicy {
            error_routing_key: Some("parking".into()),
            ..Default::default()
        }
        .with_max_dead_lettered_count(1);
        assert_eq!(
            resolver(policy).resolve(&with_death_count(5), &failed()),
            FinalAction::DeadLetter {
                exchange: String::new(),
                routing_key: "parking".into()
            }
        );
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = RabbitmqEndpointConfig::new("orders", "ingest");
        config.requeue_delay_ms = 1500;
        let policy = DeliveryPolicy::from_config(&config);
        assert_eq!(policy.requeue_delay, Duration::from_millis(1500));
        assert_eq!(policy.max_dead_lettered_count, None);

        config.max_dead_lettered_count = 0;
        assert_eq!(
            DeliveryPolicy::from_config(&config).max_dead_lettered_count,
            Some(0)
        );
    }

    #[test]
    fn test_disabled_ceiling_always_rejects() {
        let r = resolver(DeliveryPolicy::default().with_max_dead_lettered_count(-1));
        assert_eq!(r.resolve(&with_death_count(100), &failed()), FinalAction::Reject);
        assert_eq!(r.resolve(&Delivery::new(1, "x"), &failed()), FinalAction::Reject);
    }
}
