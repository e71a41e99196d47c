//! Inventory reservation engine.
//!
//! Owns stock counts and time-bounded reservations per product/variant.
//! Reservations are all-or-nothing per request, serialized per stock-record
//! key so concurrent attempts can never oversell, and either confirmed
//! (stock permanently consumed) or released/expired (stock restored).

pub mod engine;
pub mod error;
pub mod events;
pub mod reservation;
pub mod stock;
pub mod sweeper;

pub use engine::{InventoryEngine, ReleaseReason, ReservationLine, ReserveOutcome};
pub use error::{InventoryError, Result};
pub use events::{FailedLine, ReservationFailedPayload, ReservedLine, StockReservedPayload};
pub use reservation::{Reservation, ReservationStatus};
pub use stock::{ShardedStockArena, StockKey, StockMovementReason, StockRecord};
pub use sweeper::ExpirySweeper;
