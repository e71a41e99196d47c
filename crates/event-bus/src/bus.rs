//! Transport contract: publish/subscribe with retry semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::error::{HandlerError, Result};

/// A consumer of delivered envelopes.
///
/// Handlers must be idempotent: redelivery of the same event id must not
/// double-apply effects.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name, used in logs and dead-letter records.
    fn name(&self) -> &'static str;

    /// Handles a single delivered envelope.
    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError>;
}

/// The producer/consumer boundary every component talks through.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hands an envelope to the transport.
    ///
    /// Returns once the envelope is accepted for delivery, not once it is
    /// delivered. Fire-and-forget from the producer's perspective.
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;

    /// Registers a handler invoked once per delivered envelope of the
    /// given event type.
    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);
}

/// Retry budget applied to failing handlers before dead-lettering.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total delivery attempts per handler (first try included).
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Returns the backoff delay before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }
}
