//! Work handle: wraps a claimed work item with its claim identifier.

use std::path::PathBuf;

/// Opaque claim identifier used by queue backends to track ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimId {
    /// Sidecar lock marker created atomically next to the item.
    LockMarker { path: PathBuf, token: String },
    /// Unacknowledged broker delivery.
    DeliveryTag(u64),
    /// Locking disabled for this endpoint.
    Unlocked,
}

/// A claimed work item. Move semantics: consumed by `finalize()` or `release()`.
///
/// If dropped without being settled, logs a warning. Lock markers left behind
/// this way are recovered by the auto-release policy; broker deliveries are
/// redelivered when the connection closes.
pub struct WorkHandle<T: Send + Sync> {
    pub item: T,
    pub(crate) claim_id: ClaimId,
    guard: SettleGuard,
}

struct SettleGuard {
    label: String,
    settled: bool,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                "WorkHandle for {} dropped without being finalized or released",
                self.label
            );
        }
    }
}

impl<T: Send + Sync> WorkHandle<T> {
    pub(crate) fn new(item: T, claim_id: ClaimId, label: impl Into<String>) -> Self {
        Self {
            item,
            claim_id,
            guard: SettleGuard {
                label: label.into(),
                settled: false,
            },
        }
    }

    pub fn claim_id(&self) -> &ClaimId {
        &self.claim_id
    }

    /// Take the item and claim back out (called internally by finalize/release).
    pub(crate) fn consume(self) -> (T, ClaimId) {
        let WorkHandle {
            item,
            claim_id,
            mut guard,
        } = self;
        guard.settled = true;
        (item, claim_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_returns_item_and_claim() {
        let handle = WorkHandle::new("a.txt".to_string(), ClaimId::DeliveryTag(7), "a.txt");
        assert_eq!(handle.claim_id(), &ClaimId::DeliveryTag(7));
        let (item, claim) = handle.consume();
        assert_eq!(item, "a.txt");
        assert_eq!(claim, ClaimId::DeliveryTag(7));
    }
}
