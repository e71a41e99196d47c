//! Saga error types.

use common::OrderId;
use thiserror::Error;

/// Errors from saga coordination.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An event referenced an order this coordinator never created.
    /// Signals a data-integrity fault, not a normal out-of-order event.
    #[error("event references unknown order {0}")]
    UnknownOrder(OrderId),

    #[error(transparent)]
    Order(#[from] orders::OrderError),

    #[error(transparent)]
    Inventory(#[from] inventory::InventoryError),

    #[error(transparent)]
    Payment(#[from] payment::PaymentError),

    #[error(transparent)]
    Bus(#[from] event_bus::BusError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<SagaError> for event_bus::HandlerError {
    fn from(e: SagaError) -> Self {
        event_bus::HandlerError::new(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
