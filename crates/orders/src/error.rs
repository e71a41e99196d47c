//! Order error types.

use common::{OrderId, ProductId};
use thiserror::Error;

use crate::status::OrderStatus;

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("order {id} already exists")]
    AlreadyExists { id: OrderId },

    #[error("order {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order must have at least one line item")]
    EmptyOrder,

    #[error("line item for {product_id} has zero quantity")]
    ZeroQuantity { product_id: ProductId },
}

pub type Result<T> = std::result::Result<T, OrderError>;
