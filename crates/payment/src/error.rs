//! Payment error types.

use common::{OrderId, PaymentId};
use thiserror::Error;

use crate::payment::PaymentStatus;

/// Errors from payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("payment {id} is {actual}, cannot {action}")]
    InvalidState {
        id: PaymentId,
        actual: PaymentStatus,
        action: &'static str,
    },

    #[error("order {order_id} already has an active payment {payment_id}")]
    DuplicatePayment {
        order_id: OrderId,
        payment_id: PaymentId,
    },

    #[error("payment amount must be positive, got {cents} cents")]
    NonPositiveAmount { cents: i64 },

    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Bus(#[from] event_bus::BusError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PaymentError>;
