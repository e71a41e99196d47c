//! Event envelope protocol and transport contract.
//!
//! Every component publishes immutable [`EventEnvelope`]s and consumes them
//! through idempotent [`EventHandler`]s. Delivery is at-least-once: a handler
//! that fails is retried with backoff, and after the retry budget is
//! exhausted the envelope is parked on a dead-letter queue rather than
//! dropped. Envelopes that belong to the same saga run (same routing key)
//! are delivered in emission order.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod memory;

pub use bus::{EventBus, EventHandler, RetryPolicy};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId, event_types};
pub use error::{BusError, HandlerError, Result};
pub use memory::{DeadLetter, InMemoryEventBus};
