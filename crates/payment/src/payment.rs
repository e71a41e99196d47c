//! The payment aggregate and its state machine.

use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

/// Which external provider a payment is charged through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderKind {
    Stripe,
    Paypal,
}

impl ProviderKind {
    /// Returns the wire name of the provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Stripe => "STRIPE",
            ProviderKind::Paypal => "PAYPAL",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a payment.
///
/// `INITIATED` and `REQUIRES_ACTION` are live; `SUCCESS`, `FAILED` and
/// `REFUNDED` are terminal except that `SUCCESS` may still move to
/// `REFUNDED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Initiated,
    RequiresAction,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Whether the payment can still reach a terminal outcome.
    pub fn can_complete(&self) -> bool {
        matches!(self, PaymentStatus::Initiated | PaymentStatus::RequiresAction)
    }

    /// Whether the payment can be refunded.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Success)
    }

    /// Whether the payment reached an outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::RequiresAction => "REQUIRES_ACTION",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single charge attempt for an order.
///
/// At most one non-`FAILED` payment exists per order; a retry after failure
/// gets a new payment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: Currency,
    pub provider: ProviderKind,
    pub status: PaymentStatus,
    /// Reference assigned by the provider once the charge was accepted.
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new payment in `INITIATED`.
    pub fn new(order_id: OrderId, amount: Money, currency: Currency, provider: ProviderKind) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            currency,
            provider,
            status: PaymentStatus::Initiated,
            provider_reference: None,
            created_at: Utc::now(),
        }
    }
}
