//! The order fulfillment saga coordinator.
//!
//! Drives the choreography: a create request makes an order, reserves
//! stock and initiates payment; payment and expiry events then advance or
//! compensate the order. There is no distributed transaction anywhere in
//! this flow; a reservation once made is only ever undone by an explicit
//! release or its TTL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use common::{Address, Currency, Money, OrderId, ProductId, UserId, VariantId};
use event_bus::{EventBus, EventEnvelope, EventId, event_types};
use inventory::{InventoryEngine, ReleaseReason, ReservationLine, ReserveOutcome};
use orders::{LineItem, Order, OrderCancelledPayload, OrderCreatedPayload, OrderStatus, OrderStore, cancel_reasons};
use payment::{PaymentFailedPayload, PaymentOrchestrator, PaymentProvider, PaymentSucceededPayload};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};

/// One requested order line.
#[derive(Debug, Clone)]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
}

/// An order-create request as it arrives from the transport layer.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub lines: Vec<OrderLineRequest>,
    pub currency: Currency,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    /// Client-supplied key; a retried request with the same key returns
    /// the original order instead of re-executing.
    pub idempotency_key: Option<String>,
}

/// Saga tuning knobs.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// How long a reservation holds stock before the sweeper reclaims it.
    pub reservation_ttl_seconds: i64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            reservation_ttl_seconds: 900,
        }
    }
}

/// Coordinates orders, inventory and payment through events.
pub struct SagaCoordinator<B, P>
where
    B: EventBus,
    P: PaymentProvider,
{
    store: Arc<OrderStore>,
    inventory: Arc<InventoryEngine<B>>,
    payments: Arc<PaymentOrchestrator<B, P>>,
    bus: B,
    config: SagaConfig,
    // Keyed claim slots: locking a slot serializes requests sharing an
    // idempotency key, so only the first one runs the create leg.
    idempotency_keys: Mutex<HashMap<String, Arc<Mutex<Option<OrderId>>>>>,
    // Event ids already applied, per order: redelivery is a logged no-op.
    processed_events: Mutex<HashMap<OrderId, HashSet<EventId>>>,
}

impl<B, P> SagaCoordinator<B, P>
where
    B: EventBus + Clone + 'static,
    P: PaymentProvider + 'static,
{
    /// Creates a coordinator over the given collaborators.
    pub fn new(
        bus: B,
        store: Arc<OrderStore>,
        inventory: Arc<InventoryEngine<B>>,
        payments: Arc<PaymentOrchestrator<B, P>>,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            payments,
            bus,
            config,
            idempotency_keys: Mutex::new(HashMap::new()),
            processed_events: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes the coordinator's event handlers on the bus.
    pub async fn register(self: &Arc<Self>) {
        let handler: Arc<dyn event_bus::EventHandler> =
            Arc::new(crate::handlers::SagaEvents(Arc::clone(self)));
        self.bus
            .subscribe(event_types::PAYMENT_SUCCEEDED, Arc::clone(&handler))
            .await;
        self.bus
            .subscribe(event_types::PAYMENT_FAILED, Arc::clone(&handler))
            .await;
        self.bus
            .subscribe(event_types::STOCK_RESERVATION_FAILED, handler)
            .await;
    }

    /// Runs the synchronous leg of the saga: create the order, reserve
    /// stock, and either initiate payment or cancel.
    ///
    /// Returns the order as it stands when the request completes; payment
    /// outcome events advance it further asynchronously.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        metrics::counter!("saga_orders_requested").increment(1);

        let Some(key) = request.idempotency_key.clone() else {
            return self.run_create_leg(request).await;
        };

        // Claim the key's slot for the whole create leg. A concurrent
        // request with the same key blocks on the slot lock and then
        // finds the first request's order recorded in it; releasing the
        // slot without recording (the error path) lets a retry run the
        // leg again.
        let slot = {
            let mut keys = self.idempotency_keys.lock().await;
            Arc::clone(keys.entry(key).or_default())
        };
        let mut claimed = slot.lock().await;
        if let Some(order_id) = *claimed {
            tracing::info!(%order_id, "idempotency key replay, returning existing order");
            return self
                .store
                .get(order_id)
                .await
                .ok_or(SagaError::UnknownOrder(order_id));
        }
        let order = self.run_create_leg(request).await?;
        *claimed = Some(order.id);
        Ok(order)
    }

    async fn run_create_leg(&self, request: CreateOrderRequest) -> Result<Order> {
        let started = std::time::Instant::now();

        let line_items: Vec<LineItem> = request
            .lines
            .iter()
            .map(|l| {
                LineItem::new(
                    l.product_id.clone(),
                    l.variant_id.clone(),
                    l.quantity,
                    l.unit_price,
                )
            })
            .collect();
        let order = Order::new(
            request.user_id,
            line_items,
            request.currency,
            request.shipping_address.clone(),
            request.billing_address.clone(),
        )?;
        let order_id = order.id;
        self.store.insert(order.clone()).await?;

        let created = EventEnvelope::builder()
            .event_type(event_types::ORDER_CREATED)
            .aggregate_type("Order")
            .aggregate_id(order_id)
            .correlation_id(order_id)
            .payload(&OrderCreatedPayload::from_order(&order))?
            .build();
        self.bus.publish(created).await?;
        tracing::info!(%order_id, total = %order.total_amount, "order created");

        let lines: Vec<ReservationLine> = order
            .line_items
            .iter()
            .map(|l| ReservationLine::new(l.product_id.clone(), l.variant_id.clone(), l.quantity))
            .collect();
        let outcome = self
            .inventory
            .reserve(order_id, lines, self.config.reservation_ttl_seconds)
            .await?;

        let result = match outcome {
            ReserveOutcome::Reserved(_) => {
                let order = self.store.update(order_id, Order::await_payment).await?;
                tracing::info!(%order_id, "stock reserved, awaiting payment");
                self.payments
                    .initiate(order_id, order.total_amount, order.currency)
                    .await?;
                self.store
                    .get(order_id)
                    .await
                    .ok_or(SagaError::UnknownOrder(order_id))
            }
            ReserveOutcome::Rejected(failed) => {
                tracing::info!(%order_id, failed = failed.len(), "reservation rejected, cancelling order");
                self.cancel_order(order_id, cancel_reasons::RESERVATION_FAILED)
                    .await
            }
        };
        metrics::histogram!("saga_create_order_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// `PAID` → `FULFILLING`.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch_fulfillment(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .update(order_id, Order::dispatch_fulfillment)
            .await?;
        tracing::info!(%order_id, "fulfillment dispatched");
        Ok(order)
    }

    /// `FULFILLING` → `FULFILLED`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_fulfillment(&self, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .update(order_id, Order::complete_fulfillment)
            .await?;
        metrics::counter!("saga_orders_fulfilled").increment(1);
        tracing::info!(%order_id, "fulfillment complete");
        Ok(order)
    }

    /// Returns the current order snapshot.
    pub async fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.store.get(order_id).await
    }

    /// Applies a `payment.succeeded` envelope.
    ///
    /// Reservation confirmation and the `PAID` transition are applied
    /// together; if the holds have already lapsed, the payment is refunded
    /// instead of advancing the order. A success landing on an
    /// already-cancelled order likewise refunds the payment.
    pub(crate) async fn on_payment_succeeded(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload: PaymentSucceededPayload = envelope
            .payload_as()
            .map_err(event_bus::BusError::Serialization)?;
        let order_id = payload.order_id;

        if self.is_processed(order_id, envelope.event_id).await {
            tracing::info!(%order_id, event_id = %envelope.event_id, "event already applied, discarding");
            return Ok(());
        }
        let order = self
            .store
            .get(order_id)
            .await
            .ok_or(SagaError::UnknownOrder(order_id))?;

        match order.status {
            OrderStatus::PendingPayment => {
                match self.inventory.confirm_all_for_order(order_id).await {
                    Ok(_) => {
                        self.store.update(order_id, Order::mark_paid).await?;
                        metrics::counter!("saga_orders_paid").increment(1);
                        tracing::info!(%order_id, payment_id = %payload.payment_id, "order paid");
                    }
                    Err(inventory::InventoryError::InvalidState { .. }) => {
                        // The holds lapsed before the payment landed; the
                        // expiry notice cancels the order.
                        tracing::warn!(
                            %order_id,
                            payment_id = %payload.payment_id,
                            "holds no longer confirmable, refunding payment"
                        );
                        self.payments.refund(payload.payment_id).await?;
                        metrics::counter!("saga_payments_refunded_after_cancel").increment(1);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            OrderStatus::Cancelled => {
                tracing::warn!(
                    %order_id,
                    payment_id = %payload.payment_id,
                    "payment succeeded after cancellation, refunding"
                );
                self.payments.refund(payload.payment_id).await?;
                metrics::counter!("saga_payments_refunded_after_cancel").increment(1);
            }
            status => {
                tracing::info!(%order_id, %status, "payment success in unexpected state, discarding");
            }
        }

        self.mark_processed(order_id, envelope.event_id).await;
        Ok(())
    }

    /// Applies a `payment.failed` envelope: compensate and cancel.
    pub(crate) async fn on_payment_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload: PaymentFailedPayload = envelope
            .payload_as()
            .map_err(event_bus::BusError::Serialization)?;
        let order_id = payload.order_id;

        if self.is_processed(order_id, envelope.event_id).await {
            tracing::info!(%order_id, event_id = %envelope.event_id, "event already applied, discarding");
            return Ok(());
        }
        let order = self
            .store
            .get(order_id)
            .await
            .ok_or(SagaError::UnknownOrder(order_id))?;

        if order.status == OrderStatus::PendingPayment {
            self.store.update(order_id, Order::fail_payment).await?;
            let released = self
                .inventory
                .release_all_for_order(order_id, ReleaseReason::Compensation)
                .await?;
            tracing::info!(%order_id, released, reason = %payload.reason, "payment failed, reservations released");
            self.cancel_order(order_id, cancel_reasons::PAYMENT_FAILED)
                .await?;
        } else {
            tracing::info!(%order_id, status = %order.status, "payment failure in unexpected state, discarding");
        }

        self.mark_processed(order_id, envelope.event_id).await;
        Ok(())
    }

    /// Applies a `stock.reservation_failed` envelope.
    ///
    /// Only the expiry notices from the sweeper act here; synchronous
    /// rejections were already handled inside [`create_order`].
    pub(crate) async fn on_reservation_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload: inventory::ReservationFailedPayload = envelope
            .payload_as()
            .map_err(event_bus::BusError::Serialization)?;
        if payload.reason != inventory::events::REASON_EXPIRED {
            return Ok(());
        }
        let order_id = payload.order_id;

        if self.is_processed(order_id, envelope.event_id).await {
            tracing::info!(%order_id, event_id = %envelope.event_id, "event already applied, discarding");
            return Ok(());
        }
        let order = self
            .store
            .get(order_id)
            .await
            .ok_or(SagaError::UnknownOrder(order_id))?;

        if order.status.can_cancel() {
            let released = self
                .inventory
                .release_all_for_order(order_id, ReleaseReason::Expired)
                .await?;
            tracing::info!(%order_id, released, "reservation expired, cancelling order");
            self.cancel_order(order_id, cancel_reasons::RESERVATION_EXPIRED)
                .await?;
        } else {
            tracing::info!(%order_id, status = %order.status, "expiry notice for settled order, discarding");
        }

        self.mark_processed(order_id, envelope.event_id).await;
        Ok(())
    }

    async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Order> {
        let order = self.store.update(order_id, Order::cancel).await?;
        metrics::counter!("saga_orders_cancelled").increment(1);

        let cancelled = EventEnvelope::builder()
            .event_type(event_types::ORDER_CANCELLED)
            .aggregate_type("Order")
            .aggregate_id(order_id)
            .correlation_id(order_id)
            .payload(&OrderCancelledPayload {
                order_id,
                reason: reason.to_string(),
                cancelled_at: Utc::now(),
            })?
            .build();
        self.bus.publish(cancelled).await?;
        tracing::info!(%order_id, reason, "order cancelled");
        Ok(order)
    }

    async fn is_processed(&self, order_id: OrderId, event_id: EventId) -> bool {
        self.processed_events
            .lock()
            .await
            .get(&order_id)
            .is_some_and(|seen| seen.contains(&event_id))
    }

    async fn mark_processed(&self, order_id: OrderId, event_id: EventId) {
        self.processed_events
            .lock()
            .await
            .entry(order_id)
            .or_default()
            .insert(event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::InMemoryEventBus;
    use payment::{
        ChargeBehavior, InMemoryProvider, PaymentStatus, ProviderCallback, ProviderKind,
    };

    fn request(sku: &str, quantity: u32) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: UserId::new(),
            lines: vec![OrderLineRequest {
                product_id: sku.into(),
                variant_id: None,
                quantity,
                unit_price: Money::from_cents(1999),
            }],
            currency: Currency::Usd,
            shipping_address: Address::new("1 Main St", "Springfield", "US"),
            billing_address: None,
            idempotency_key: None,
        }
    }

    // No `register()` here: envelopes are applied by hand so the ordering
    // between an expiry and a payment outcome is under test control.
    #[allow(clippy::type_complexity)]
    fn coordinator(
        config: SagaConfig,
    ) -> (
        Arc<SagaCoordinator<InMemoryEventBus, InMemoryProvider>>,
        Arc<InventoryEngine<InMemoryEventBus>>,
        Arc<PaymentOrchestrator<InMemoryEventBus, InMemoryProvider>>,
        Arc<InMemoryProvider>,
    ) {
        let bus = InMemoryEventBus::new();
        let store = Arc::new(OrderStore::new());
        let inventory = Arc::new(InventoryEngine::new(bus.clone()));
        let provider = Arc::new(InMemoryProvider::new(ProviderKind::Stripe));
        let payments = Arc::new(PaymentOrchestrator::new(bus.clone(), Arc::clone(&provider)));
        let saga = Arc::new(SagaCoordinator::new(
            bus,
            store,
            Arc::clone(&inventory),
            Arc::clone(&payments),
            config,
        ));
        (saga, inventory, payments, provider)
    }

    #[tokio::test]
    async fn payment_success_on_expired_holds_refunds_instead_of_advancing() {
        let (saga, inventory, payments, provider) = coordinator(SagaConfig {
            reservation_ttl_seconds: 0,
        });
        provider.set_behavior(ChargeBehavior::RequireAction).await;
        inventory.set_stock("SKU-001", None, 5).await;

        let order = saga.create_order(request("SKU-001", 2)).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingPayment);

        let expired = inventory.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);

        let payment = payments.payments_for_order(order.id).await[0].clone();
        payments
            .handle_provider_callback(payment.id, ProviderCallback::Succeeded { reference: None })
            .await
            .unwrap();

        // The success envelope lands while the expiry notice is still
        // unprocessed, so the order is still awaiting payment and the
        // holds can no longer be confirmed.
        let envelope = EventEnvelope::builder()
            .event_type(event_types::PAYMENT_SUCCEEDED)
            .aggregate_type("Payment")
            .aggregate_id(payment.id)
            .correlation_id(order.id)
            .payload(&PaymentSucceededPayload {
                payment_id: payment.id,
                order_id: order.id,
                amount: payment.amount,
                currency: payment.currency,
                provider: payment.provider,
                provider_reference: None,
                succeeded_at: Utc::now(),
            })
            .unwrap()
            .build();
        saga.on_payment_succeeded(&envelope).await.unwrap();

        let payment = payments.get_payment(payment.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
        let order = saga.get_order(order.id).await.unwrap();
        assert_ne!(order.status, OrderStatus::Paid);
        assert_eq!(inventory.stock("SKU-001", None).await.unwrap().available, 5);
    }
}
