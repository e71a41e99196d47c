//! Payment orchestration.
//!
//! Drives a single payment through provider-facing states and emits exactly
//! one terminal outcome event per payment. Provider callbacks may be
//! redelivered; terminal payments absorb them without re-emitting.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod payment;
pub mod provider;

pub use error::{PaymentError, Result};
pub use events::{PaymentFailedPayload, PaymentSucceededPayload, REASON_PROVIDER_UNAVAILABLE};
pub use orchestrator::{PaymentOrchestrator, ProviderCallback};
pub use payment::{Payment, PaymentStatus, ProviderKind};
pub use provider::{ChargeBehavior, ChargeOutcome, InMemoryProvider, PaymentProvider};
