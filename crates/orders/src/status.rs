//! The order status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
///
/// The happy path is `CREATED` → `PENDING_PAYMENT` → `PAID` → `FULFILLING`
/// → `FULFILLED`; `PAYMENT_FAILED` and `CANCELLED` are the failure
/// branches. Once paid, an order can no longer be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Created,
    PendingPayment,
    PaymentFailed,
    Paid,
    Fulfilling,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    /// `CREATED` → `PENDING_PAYMENT`, after all lines were reserved.
    pub fn can_await_payment(&self) -> bool {
        matches!(self, OrderStatus::Created)
    }

    /// `PENDING_PAYMENT` → `PAID`.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// `PENDING_PAYMENT` → `PAYMENT_FAILED`.
    pub fn can_fail_payment(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Whether the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created | OrderStatus::PendingPayment | OrderStatus::PaymentFailed
        )
    }

    /// `PAID` → `FULFILLING`.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// `FULFILLING` → `FULFILLED`.
    pub fn can_complete_fulfillment(&self) -> bool {
        matches!(self, OrderStatus::Fulfilling)
    }

    /// Whether the order reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Fulfilled | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Fulfilling => "FULFILLING",
            OrderStatus::Fulfilled => "FULFILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_guards() {
        assert!(OrderStatus::Created.can_await_payment());
        assert!(OrderStatus::PendingPayment.can_mark_paid());
        assert!(OrderStatus::Paid.can_dispatch());
        assert!(OrderStatus::Fulfilling.can_complete_fulfillment());
        assert!(OrderStatus::Fulfilled.is_terminal());
    }

    #[test]
    fn paid_orders_cannot_be_cancelled() {
        assert!(OrderStatus::Created.can_cancel());
        assert!(OrderStatus::PendingPayment.can_cancel());
        assert!(OrderStatus::PaymentFailed.can_cancel());

        assert!(!OrderStatus::Paid.can_cancel());
        assert!(!OrderStatus::Fulfilling.can_cancel());
        assert!(!OrderStatus::Fulfilled.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn guards_reject_out_of_order_transitions() {
        assert!(!OrderStatus::Created.can_mark_paid());
        assert!(!OrderStatus::Paid.can_mark_paid());
        assert!(!OrderStatus::PendingPayment.can_dispatch());
        assert!(!OrderStatus::PaymentFailed.can_mark_paid());
    }

    #[test]
    fn wire_names() {
        assert_eq!(OrderStatus::PendingPayment.as_str(), "PENDING_PAYMENT");
        assert_eq!(
            serde_json::to_string(&OrderStatus::PaymentFailed).unwrap(),
            "\"PAYMENT_FAILED\""
        );
    }
}
