//! Drives payments through provider-facing states and emits outcome events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use common::{Currency, Money, OrderId, PaymentId};
use event_bus::{EventBus, EventEnvelope, event_types};
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::events::{PaymentFailedPayload, PaymentSucceededPayload, REASON_PROVIDER_UNAVAILABLE};
use crate::payment::{Payment, PaymentStatus};
use crate::provider::{ChargeOutcome, PaymentProvider};

/// Asynchronous provider notification for a pending payment.
#[derive(Debug, Clone)]
pub enum ProviderCallback {
    Succeeded { reference: Option<String> },
    Failed { reason: String },
}

#[derive(Default)]
struct PaymentBook {
    by_id: HashMap<PaymentId, Payment>,
    by_order: HashMap<OrderId, Vec<PaymentId>>,
    // Payments whose terminal event was already published.
    emitted: HashSet<PaymentId>,
}

/// Owns payment records and the provider conversation.
///
/// Every terminal transition publishes exactly one `payment.succeeded` or
/// `payment.failed`; redelivered provider callbacks for an already-terminal
/// payment are logged no-ops.
pub struct PaymentOrchestrator<B: EventBus, P: PaymentProvider> {
    book: RwLock<PaymentBook>,
    provider: Arc<P>,
    bus: B,
}

impl<B: EventBus, P: PaymentProvider> PaymentOrchestrator<B, P> {
    /// Creates an orchestrator charging through the given provider.
    pub fn new(bus: B, provider: Arc<P>) -> Self {
        Self {
            book: RwLock::new(PaymentBook::default()),
            provider,
            bus,
        }
    }

    /// Creates a payment and submits the charge to the provider.
    ///
    /// The synchronous provider answer decides the first transition:
    /// immediate settlement lands in `SUCCESS`, a decline in `FAILED`, an
    /// asynchronous flow in `REQUIRES_ACTION` awaiting
    /// [`handle_provider_callback`](Self::handle_provider_callback). A
    /// provider transport failure fails the payment rather than leaving it
    /// dangling; the saga treats it like any other declined charge.
    #[tracing::instrument(skip(self, amount), fields(%order_id, amount = %amount))]
    pub async fn initiate(
        &self,
        order_id: OrderId,
        amount: Money,
        currency: Currency,
    ) -> Result<Payment> {
        if !amount.is_positive() {
            return Err(PaymentError::NonPositiveAmount {
                cents: amount.cents(),
            });
        }

        let payment = {
            let mut book = self.book.write().await;
            if let Some(existing) = book
                .by_order
                .get(&order_id)
                .into_iter()
                .flatten()
                .find(|id| {
                    book.by_id
                        .get(id)
                        .is_some_and(|p| p.status != PaymentStatus::Failed)
                })
            {
                return Err(PaymentError::DuplicatePayment {
                    order_id,
                    payment_id: *existing,
                });
            }

            let payment = Payment::new(order_id, amount, currency, self.provider.kind());
            book.by_order.entry(order_id).or_default().push(payment.id);
            book.by_id.insert(payment.id, payment.clone());
            payment
        };

        metrics::counter!("payments_initiated").increment(1);
        tracing::info!(payment_id = %payment.id, "payment initiated");

        match self.provider.charge(&payment).await {
            Ok(ChargeOutcome::Succeeded { reference }) => {
                self.complete(payment.id, Ok(Some(reference))).await
            }
            Ok(ChargeOutcome::Declined { reason }) => {
                self.complete(payment.id, Err(reason)).await
            }
            Ok(ChargeOutcome::Pending { reference }) => {
                let mut book = self.book.write().await;
                let payment = book
                    .by_id
                    .get_mut(&payment.id)
                    .ok_or(PaymentError::PaymentNotFound(payment.id))?;
                payment.status = PaymentStatus::RequiresAction;
                payment.provider_reference = Some(reference);
                tracing::info!(payment_id = %payment.id, "payment awaiting provider action");
                Ok(payment.clone())
            }
            Err(PaymentError::Provider(message)) => {
                tracing::warn!(payment_id = %payment.id, error = %message, "provider unreachable, failing payment");
                self.complete(payment.id, Err(REASON_PROVIDER_UNAVAILABLE.to_string()))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Applies an asynchronous provider notification.
    ///
    /// A callback for an already-terminal payment returns the current record
    /// without emitting a second outcome event.
    #[tracing::instrument(skip(self))]
    pub async fn handle_provider_callback(
        &self,
        payment_id: PaymentId,
        callback: ProviderCallback,
    ) -> Result<Payment> {
        {
            let book = self.book.read().await;
            let payment = book
                .by_id
                .get(&payment_id)
                .ok_or(PaymentError::PaymentNotFound(payment_id))?;
            if payment.status.is_terminal() {
                tracing::info!(
                    %payment_id,
                    status = %payment.status,
                    "callback for terminal payment ignored"
                );
                return Ok(payment.clone());
            }
        }

        match callback {
            ProviderCallback::Succeeded { reference } => {
                self.complete(payment_id, Ok(reference)).await
            }
            ProviderCallback::Failed { reason } => self.complete(payment_id, Err(reason)).await,
        }
    }

    /// Refunds a settled payment: `SUCCESS` → `REFUNDED`.
    ///
    /// Used when a payment lands after its order was already cancelled.
    /// Refunding an already-refunded payment is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn refund(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = {
            let book = self.book.read().await;
            let payment = book
                .by_id
                .get(&payment_id)
                .ok_or(PaymentError::PaymentNotFound(payment_id))?;
            match payment.status {
                PaymentStatus::Refunded => return Ok(payment.clone()),
                PaymentStatus::Success => payment.clone(),
                actual => {
                    return Err(PaymentError::InvalidState {
                        id: payment_id,
                        actual,
                        action: "refund",
                    });
                }
            }
        };

        self.provider.refund(&payment).await?;

        let mut book = self.book.write().await;
        let payment = book
            .by_id
            .get_mut(&payment_id)
            .ok_or(PaymentError::PaymentNotFound(payment_id))?;
        payment.status = PaymentStatus::Refunded;

        metrics::counter!("payments_refunded").increment(1);
        tracing::info!(%payment_id, order_id = %payment.order_id, "payment refunded");
        Ok(payment.clone())
    }

    /// Returns a copy of a payment.
    pub async fn get_payment(&self, payment_id: PaymentId) -> Option<Payment> {
        self.book.read().await.by_id.get(&payment_id).cloned()
    }

    /// Returns all payments made for an order, oldest first.
    pub async fn payments_for_order(&self, order_id: OrderId) -> Vec<Payment> {
        let book = self.book.read().await;
        book.by_order
            .get(&order_id)
            .map(|ids| ids.iter().filter_map(|id| book.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    // Applies the terminal transition and publishes the outcome event once.
    async fn complete(
        &self,
        payment_id: PaymentId,
        outcome: std::result::Result<Option<String>, String>,
    ) -> Result<Payment> {
        let (payment, first_emission) = {
            let mut book = self.book.write().await;
            let payment = book
                .by_id
                .get_mut(&payment_id)
                .ok_or(PaymentError::PaymentNotFound(payment_id))?;

            if !payment.status.can_complete() {
                return Err(PaymentError::InvalidState {
                    id: payment_id,
                    actual: payment.status,
                    action: "complete",
                });
            }

            match &outcome {
                Ok(reference) => {
                    payment.status = PaymentStatus::Success;
                    if reference.is_some() {
                        payment.provider_reference = reference.clone();
                    }
                }
                Err(_) => payment.status = PaymentStatus::Failed,
            }
            let snapshot = payment.clone();
            let first_emission = book.emitted.insert(payment_id);
            (snapshot, first_emission)
        };

        if !first_emission {
            tracing::warn!(%payment_id, "terminal event already emitted, skipping");
            return Ok(payment);
        }

        let envelope = match outcome {
            Ok(_) => {
                metrics::counter!("payments_succeeded").increment(1);
                tracing::info!(%payment_id, order_id = %payment.order_id, "payment succeeded");
                EventEnvelope::builder()
                    .event_type(event_types::PAYMENT_SUCCEEDED)
                    .aggregate_type("Payment")
                    .aggregate_id(payment.id)
                    .correlation_id(payment.order_id)
                    .payload(&PaymentSucceededPayload {
                        payment_id: payment.id,
                        order_id: payment.order_id,
                        amount: payment.amount,
                        currency: payment.currency,
                        provider: payment.provider,
                        provider_reference: payment.provider_reference.clone(),
                        succeeded_at: Utc::now(),
                    })?
                    .build()
            }
            Err(reason) => {
                metrics::counter!("payments_failed").increment(1);
                tracing::info!(%payment_id, order_id = %payment.order_id, %reason, "payment failed");
                EventEnvelope::builder()
                    .event_type(event_types::PAYMENT_FAILED)
                    .aggregate_type("Payment")
                    .aggregate_id(payment.id)
                    .correlation_id(payment.order_id)
                    .payload(&PaymentFailedPayload {
                        payment_id: payment.id,
                        order_id: payment.order_id,
                        amount: payment.amount,
                        currency: payment.currency,
                        provider: payment.provider,
                        reason,
                        failed_at: Utc::now(),
                    })?
                    .build()
            }
        };
        self.bus.publish(envelope).await?;
        Ok(payment)
    }
}
