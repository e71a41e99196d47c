//! External payment provider seam.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{PaymentError, Result};
use crate::payment::{Payment, ProviderKind};

/// Synchronous answer from a provider charge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The charge settled immediately.
    Succeeded { reference: String },
    /// The provider needs an asynchronous confirmation (3DS, redirect).
    Pending { reference: String },
    /// The provider declined the charge.
    Declined { reason: String },
}

/// Provider-facing operations the orchestrator depends on.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Which provider this is, for the payment record.
    fn kind(&self) -> ProviderKind;

    /// Submits a charge to the provider.
    async fn charge(&self, payment: &Payment) -> Result<ChargeOutcome>;

    /// Refunds a settled charge.
    async fn refund(&self, payment: &Payment) -> Result<()>;
}

/// How the in-memory provider answers the next charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeBehavior {
    #[default]
    Succeed,
    RequireAction,
    Decline,
}

/// Configurable in-memory payment provider for tests and local runs.
pub struct InMemoryProvider {
    kind: ProviderKind,
    behavior: Mutex<ChargeBehavior>,
    fail_on_charge: AtomicU32,
    fail_on_refund: AtomicU32,
    reference_seq: AtomicU64,
    pub charge_count: AtomicU32,
    pub refund_count: AtomicU32,
}

impl InMemoryProvider {
    /// Creates a provider that settles every charge immediately.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            behavior: Mutex::new(ChargeBehavior::Succeed),
            fail_on_charge: AtomicU32::new(0),
            fail_on_refund: AtomicU32::new(0),
            reference_seq: AtomicU64::new(1),
            charge_count: AtomicU32::new(0),
            refund_count: AtomicU32::new(0),
        }
    }

    /// Sets how subsequent charges are answered.
    pub async fn set_behavior(&self, behavior: ChargeBehavior) {
        *self.behavior.lock().await = behavior;
    }

    /// Makes the next `n` charge calls fail with a transport error.
    pub fn set_fail_on_charge(&self, n: u32) {
        self.fail_on_charge.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` refund calls fail with a transport error.
    pub fn set_fail_on_refund(&self, n: u32) {
        self.fail_on_refund.store(n, Ordering::SeqCst);
    }

    fn next_reference(&self) -> String {
        let seq = self.reference_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}-ref-{seq}", self.kind.as_str().to_lowercase())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentProvider for InMemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn charge(&self, payment: &Payment) -> Result<ChargeOutcome> {
        self.charge_count.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_on_charge) {
            return Err(PaymentError::Provider("provider unavailable".to_string()));
        }

        let outcome = match *self.behavior.lock().await {
            ChargeBehavior::Succeed => ChargeOutcome::Succeeded {
                reference: self.next_reference(),
            },
            ChargeBehavior::RequireAction => ChargeOutcome::Pending {
                reference: self.next_reference(),
            },
            ChargeBehavior::Decline => ChargeOutcome::Declined {
                reason: "card declined".to_string(),
            },
        };
        tracing::debug!(payment_id = %payment.id, ?outcome, "provider charge");
        Ok(outcome)
    }

    async fn refund(&self, payment: &Payment) -> Result<()> {
        self.refund_count.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_on_refund) {
            return Err(PaymentError::Provider("provider unavailable".to_string()));
        }
        tracing::debug!(payment_id = %payment.id, "provider refund");
        Ok(())
    }
}
