//! Payload shapes for order lifecycle events.

use chrono::{DateTime, Utc};
use common::{Currency, Money, OrderId, ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// One line of an `order.created` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLinePayload {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Payload of `order.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub lines: Vec<OrderLinePayload>,
    pub currency: Currency,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
}

impl OrderCreatedPayload {
    /// Builds the payload from an order snapshot.
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            lines: order
                .line_items
                .iter()
                .map(|l| OrderLinePayload {
                    product_id: l.product_id.clone(),
                    variant_id: l.variant_id.clone(),
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    line_total: l.line_total,
                })
                .collect(),
            currency: order.currency,
            total_amount: order.total_amount,
            created_at: order.created_at,
        }
    }
}

/// Payload of `order.cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledPayload {
    pub order_id: OrderId,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Cancellation reasons carried in `order.cancelled`.
pub mod cancel_reasons {
    pub const RESERVATION_FAILED: &str = "RESERVATION_FAILED";
    pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";
    pub const RESERVATION_EXPIRED: &str = "RESERVATION_EXPIRED";
}
