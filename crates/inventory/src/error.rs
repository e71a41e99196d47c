//! Inventory error types.

use common::{OrderId, ProductId, ReservationId};
use thiserror::Error;

use crate::reservation::ReservationStatus;

/// Errors that can occur during inventory operations.
///
/// Insufficient stock is not in this enum: a reservation that cannot be
/// satisfied is a normal business outcome reported through
/// [`crate::engine::ReserveOutcome::Rejected`], not a fault.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The reservation is not in a state that permits the operation.
    /// Usually signals a sequencing bug upstream.
    #[error("Invalid reservation state: cannot {action} reservation {id} in {actual} state")]
    InvalidState {
        id: ReservationId,
        actual: ReservationStatus,
        action: &'static str,
    },

    /// An order already holds an active reservation for this product line.
    #[error("Order {order_id} already holds an active reservation for {product_id}")]
    DuplicateReservation {
        order_id: OrderId,
        product_id: ProductId,
    },

    /// A stock adjustment would drive `available` below zero.
    #[error("Stock adjustment rejected for {product_id}: available {available}, delta {delta}")]
    InvalidAdjustment {
        product_id: ProductId,
        available: u32,
        delta: i64,
    },

    /// The event transport rejected an envelope.
    #[error("Event bus error: {0}")]
    Bus(#[from] event_bus::BusError),

    /// Serialization error while building an event payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
