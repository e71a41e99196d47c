//! Bus-facing adapter for the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventEnvelope, EventHandler, HandlerError, event_types};
use payment::PaymentProvider;

use crate::coordinator::SagaCoordinator;

/// Routes subscribed envelopes into the coordinator.
///
/// A failed application surfaces as a handler error so the transport
/// retries it and eventually dead-letters it; nothing is silently dropped.
pub struct SagaEvents<B, P>(pub(crate) Arc<SagaCoordinator<B, P>>)
where
    B: event_bus::EventBus + Clone + 'static,
    P: PaymentProvider + 'static;

#[async_trait]
impl<B, P> EventHandler for SagaEvents<B, P>
where
    B: event_bus::EventBus + Clone + 'static,
    P: PaymentProvider + 'static,
{
    fn name(&self) -> &'static str {
        "saga-coordinator"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        match envelope.event_type.as_str() {
            event_types::PAYMENT_SUCCEEDED => self.0.on_payment_succeeded(envelope).await?,
            event_types::PAYMENT_FAILED => self.0.on_payment_failed(envelope).await?,
            event_types::STOCK_RESERVATION_FAILED => self.0.on_reservation_failed(envelope).await?,
            other => {
                tracing::debug!(event_type = other, "unhandled event type");
            }
        }
        Ok(())
    }
}
