//! Shared identifiers and value types used across the polyshop core.
//!
//! Every aggregate gets its own newtype identifier so an order id can never
//! be passed where a payment id is expected. Monetary amounts are integer
//! cents wrapped in [`Money`].

pub mod address;
pub mod ids;
pub mod money;

pub use address::Address;
pub use ids::{OrderId, PaymentId, ProductId, ReservationId, UserId, VariantId};
pub use money::{Currency, Money};
