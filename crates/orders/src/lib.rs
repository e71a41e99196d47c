//! Order aggregate and state machine.
//!
//! Orders lock their prices and total at creation; afterwards only the
//! status moves, through explicit guarded transitions. Illegal transitions
//! are construction-time errors, never silent corrections.

pub mod error;
pub mod events;
pub mod order;
pub mod status;
pub mod store;

pub use error::{OrderError, Result};
pub use events::{OrderCancelledPayload, OrderCreatedPayload, OrderLinePayload, cancel_reasons};
pub use order::{LineItem, Order};
pub use status::OrderStatus;
pub use store::OrderStore;
