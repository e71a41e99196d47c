//! Order fulfillment saga.
//!
//! Ties orders, inventory and payment together through event choreography:
//! the coordinator runs the synchronous create leg (create, reserve,
//! initiate payment) and subscribes handlers that advance or compensate the
//! order as payment and expiry events arrive. Handlers are idempotent per
//! event id; redelivery never double-applies a side effect.

pub mod coordinator;
pub mod error;
pub mod handlers;

pub use coordinator::{CreateOrderRequest, OrderLineRequest, SagaConfig, SagaCoordinator};
pub use error::{Result, SagaError};
pub use handlers::SagaEvents;
