//! Payload shapes for payment outcome events.

use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::payment::ProviderKind;

/// Payload of `payment.succeeded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSucceededPayload {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: Currency,
    pub provider: ProviderKind,
    pub provider_reference: Option<String>,
    pub succeeded_at: DateTime<Utc>,
}

/// Payload of `payment.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedPayload {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: Currency,
    pub provider: ProviderKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Failure reason when the provider itself was unreachable.
pub const REASON_PROVIDER_UNAVAILABLE: &str = "PROVIDER_UNAVAILABLE";
