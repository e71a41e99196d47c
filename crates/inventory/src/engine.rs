//! The inventory reservation engine.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ProductId, ReservationId, VariantId};
use event_bus::{EventBus, EventEnvelope, event_types};
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};
use crate::events::{
    FailedLine, REASON_EXPIRED, REASON_INSUFFICIENT_STOCK, REASON_UNKNOWN_PRODUCT,
    ReservationFailedPayload, ReservedLine, StockReservedPayload,
};
use crate::reservation::{Reservation, ReservationStatus};
use crate::stock::{LineShortfall, ShardedStockArena, StockKey, StockMovementReason, StockRecord};

/// One line of a reservation request.
#[derive(Debug, Clone)]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

impl ReservationLine {
    /// Creates a reservation line.
    pub fn new(product_id: impl Into<ProductId>, variant_id: Option<VariantId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
            quantity,
        }
    }

    fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id.clone(), self.variant_id.clone())
    }
}

/// Result of a reservation request.
///
/// Rejection is a normal business outcome, not an error: the failing lines
/// and their shortfalls are reported so the caller can surface them.
#[derive(Debug)]
pub enum ReserveOutcome {
    /// All lines were reserved.
    Reserved(Vec<Reservation>),
    /// At least one line could not be satisfied; nothing was reserved.
    Rejected(Vec<FailedLine>),
}

impl ReserveOutcome {
    /// Returns true if the request was fully reserved.
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveOutcome::Reserved(_))
    }
}

/// Why a reservation hold is being undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Saga compensation after a downstream failure.
    Compensation,
    /// The owning order was cancelled.
    OrderCancelled,
    /// The TTL lapsed without confirmation.
    Expired,
}

impl ReleaseReason {
    /// Returns the reason name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Compensation => "COMPENSATION",
            ReleaseReason::OrderCancelled => "ORDER_CANCELLED",
            ReleaseReason::Expired => "EXPIRED",
        }
    }
}

#[derive(Default)]
struct ReservationBook {
    by_id: HashMap<ReservationId, Reservation>,
    by_order: HashMap<OrderId, Vec<ReservationId>>,
}

impl ReservationBook {
    fn active_for_line(&self, order_id: OrderId, key: &StockKey) -> bool {
        self.by_order
            .get(&order_id)
            .map(|ids| {
                ids.iter().any(|id| {
                    self.by_id.get(id).is_some_and(|r| {
                        r.is_active()
                            && r.product_id == key.product_id
                            && r.variant_id == key.variant_id
                    })
                })
            })
            .unwrap_or(false)
    }
}

/// Owns stock counts and reservations, serializing updates per stock key.
///
/// The check-and-decrement in [`reserve`](InventoryEngine::reserve) and the
/// restore in release/expiry go through the sharded arena, so two
/// concurrent attempts for the same product can never both observe
/// sufficient stock when only one can be satisfied.
pub struct InventoryEngine<B: EventBus> {
    arena: ShardedStockArena,
    book: RwLock<ReservationBook>,
    bus: B,
}

impl<B: EventBus> InventoryEngine<B> {
    /// Creates an engine publishing events to the given bus.
    pub fn new(bus: B) -> Self {
        Self {
            arena: ShardedStockArena::new(),
            book: RwLock::new(ReservationBook::default()),
            bus,
        }
    }

    /// Creates or replaces the stock record for a product/variant.
    pub async fn set_stock(
        &self,
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
        available: u32,
    ) {
        self.arena
            .set_stock(StockKey::new(product_id, variant_id), available)
            .await;
    }

    /// Returns a copy of the stock record for a product/variant.
    pub async fn stock(
        &self,
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
    ) -> Option<StockRecord> {
        self.arena
            .get(&StockKey::new(product_id, variant_id))
            .await
    }

    /// Applies a signed stock movement against `available`.
    #[tracing::instrument(skip(self), fields(reason = reason.as_str()))]
    pub async fn adjust_stock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        delta: i64,
        reason: StockMovementReason,
    ) -> Result<StockRecord> {
        let key = StockKey::new(product_id.clone(), variant_id);
        match self.arena.adjust_available(&key, delta).await {
            Ok(record) => {
                tracing::info!(%key, delta, available = record.available, "stock adjusted");
                Ok(record)
            }
            Err(LineShortfall::InsufficientStock { available }) => {
                Err(InventoryError::InvalidAdjustment {
                    product_id,
                    available,
                    delta,
                })
            }
            Err(LineShortfall::UnknownProduct) => Err(InventoryError::InvalidAdjustment {
                product_id,
                available: 0,
                delta,
            }),
        }
    }

    /// Attempts an atomic all-or-nothing reservation for an order.
    ///
    /// On success one reservation per distinct line is created in
    /// `RESERVED` with `expires_at = now + ttl_seconds` and a single
    /// `stock.reserved` event covering all lines is emitted. On rejection
    /// no reservation is created for any line and a
    /// `stock.reservation_failed` event reports the shortfalls.
    #[tracing::instrument(skip(self, lines), fields(%order_id, line_count = lines.len()))]
    pub async fn reserve(
        &self,
        order_id: OrderId,
        lines: Vec<ReservationLine>,
        ttl_seconds: i64,
    ) -> Result<ReserveOutcome> {
        metrics::counter!("inventory_reservations_total").increment(1);

        // A request naming the same line twice is one demand.
        let mut merged: Vec<ReservationLine> = Vec::new();
        for line in lines {
            match merged.iter_mut().find(|l| l.stock_key() == line.stock_key()) {
                Some(existing) => existing.quantity += line.quantity,
                None => merged.push(line),
            }
        }

        {
            let book = self.book.read().await;
            for line in &merged {
                if book.active_for_line(order_id, &line.stock_key()) {
                    return Err(InventoryError::DuplicateReservation {
                        order_id,
                        product_id: line.product_id.clone(),
                    });
                }
            }
        }

        let demand: Vec<(StockKey, u32)> = merged
            .iter()
            .map(|l| (l.stock_key(), l.quantity))
            .collect();

        if let Err(shortfalls) = self.arena.try_reserve_all(&demand).await {
            let mut failed = Vec::with_capacity(shortfalls.len());
            let mut reason = REASON_UNKNOWN_PRODUCT;
            for (key, shortfall) in shortfalls {
                let requested = merged
                    .iter()
                    .find(|l| l.stock_key() == key)
                    .map(|l| l.quantity)
                    .unwrap_or(0);
                let available = match shortfall {
                    LineShortfall::InsufficientStock { available } => {
                        reason = REASON_INSUFFICIENT_STOCK;
                        Some(available)
                    }
                    LineShortfall::UnknownProduct => None,
                };
                failed.push(FailedLine {
                    product_id: key.product_id,
                    variant_id: key.variant_id,
                    requested,
                    available,
                    reservation_id: None,
                });
            }

            metrics::counter!("inventory_reservations_rejected").increment(1);
            tracing::info!(%order_id, reason, "reservation rejected");

            let payload = ReservationFailedPayload {
                order_id,
                reason: reason.to_string(),
                lines: failed.clone(),
                failed_at: Utc::now(),
            };
            self.publish(event_types::STOCK_RESERVATION_FAILED, order_id, &payload)
                .await?;

            return Ok(ReserveOutcome::Rejected(failed));
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds);
        let mut book = self.book.write().await;

        // The duplicate check ran before the arena holds were taken, so a
        // concurrent request for the same order may have inserted its
        // reservations in between. Re-check under the write lock and give
        // the holds back if it did.
        let raced = merged
            .iter()
            .find(|l| book.active_for_line(order_id, &l.stock_key()))
            .map(|l| l.product_id.clone());
        if let Some(product_id) = raced {
            drop(book);
            for (key, quantity) in &demand {
                self.arena.restore(key, *quantity).await;
            }
            return Err(InventoryError::DuplicateReservation {
                order_id,
                product_id,
            });
        }

        let mut reservations = Vec::with_capacity(merged.len());
        for line in merged {
            let reservation = Reservation {
                id: ReservationId::new(),
                order_id,
                product_id: line.product_id,
                variant_id: line.variant_id,
                quantity: line.quantity,
                status: ReservationStatus::Reserved,
                expires_at: Some(expires_at),
                created_at: now,
            };
            book.by_order.entry(order_id).or_default().push(reservation.id);
            book.by_id.insert(reservation.id, reservation.clone());
            reservations.push(reservation);
        }
        drop(book);

        let payload = StockReservedPayload {
            order_id,
            lines: reservations
                .iter()
                .map(|r| ReservedLine {
                    reservation_id: r.id,
                    product_id: r.product_id.clone(),
                    variant_id: r.variant_id.clone(),
                    quantity: r.quantity,
                })
                .collect(),
            reserved_at: now,
            expires_at,
        };
        self.publish(event_types::STOCK_RESERVED, order_id, &payload)
            .await?;

        tracing::info!(%order_id, count = reservations.len(), "stock reserved");
        Ok(ReserveOutcome::Reserved(reservations))
    }

    /// Confirms a reservation: `RESERVED` → `CONFIRMED`.
    ///
    /// The units are now permanently consumed; `available` already reflects
    /// the deduction so only `reserved` drops. Strict entry point for
    /// direct callers: confirming an unknown or terminal reservation is an
    /// error here. Event-driven callers go through
    /// [`confirm_all_for_order`](Self::confirm_all_for_order).
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let mut book = self.book.write().await;
        let reservation = book
            .by_id
            .get_mut(&reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

        if !reservation.status.can_confirm() {
            return Err(InventoryError::InvalidState {
                id: reservation_id,
                actual: reservation.status,
                action: "confirm",
            });
        }

        reservation.status = ReservationStatus::Confirmed;
        reservation.expires_at = None;
        let key = StockKey::new(reservation.product_id.clone(), reservation.variant_id.clone());
        let quantity = reservation.quantity;
        let confirmed = reservation.clone();
        self.arena.consume(&key, quantity).await;

        metrics::counter!("inventory_reservations_confirmed").increment(1);
        tracing::info!(%reservation_id, order_id = %confirmed.order_id, "reservation confirmed");
        Ok(confirmed)
    }

    /// Confirms every reservation of an order, skipping already-confirmed
    /// ones so event redelivery is harmless.
    ///
    /// Fails with `InvalidState` if any reservation was released or expired
    /// in the meantime: the caller must not advance the order in that case.
    pub async fn confirm_all_for_order(&self, order_id: OrderId) -> Result<Vec<ReservationId>> {
        let mut book = self.book.write().await;
        let ids = book.by_order.get(&order_id).cloned().unwrap_or_default();

        // Validate the whole set before touching anything.
        for id in &ids {
            let reservation = &book.by_id[id];
            if matches!(
                reservation.status,
                ReservationStatus::Released | ReservationStatus::Expired
            ) {
                return Err(InventoryError::InvalidState {
                    id: *id,
                    actual: reservation.status,
                    action: "confirm",
                });
            }
        }

        let mut confirmed = Vec::new();
        for id in ids {
            let reservation = book.by_id.get_mut(&id).expect("listed in book");
            if reservation.status == ReservationStatus::Confirmed {
                continue;
            }
            reservation.status = ReservationStatus::Confirmed;
            reservation.expires_at = None;
            let key = StockKey::new(reservation.product_id.clone(), reservation.variant_id.clone());
            let quantity = reservation.quantity;
            self.arena.consume(&key, quantity).await;
            metrics::counter!("inventory_reservations_confirmed").increment(1);
            confirmed.push(id);
        }

        Ok(confirmed)
    }

    /// Releases a reservation: `RESERVED` → `RELEASED` (or `EXPIRED` when
    /// the reason is expiry), restoring the held units to `available`.
    ///
    /// Idempotent for already-released/expired reservations. Releasing a
    /// `CONFIRMED` reservation is `InvalidState`: it signals a sequencing
    /// bug upstream and is surfaced, not swallowed.
    #[tracing::instrument(skip(self), fields(reason = reason.as_str()))]
    pub async fn release(&self, reservation_id: ReservationId, reason: ReleaseReason) -> Result<()> {
        let mut book = self.book.write().await;
        let reservation = book
            .by_id
            .get_mut(&reservation_id)
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

        match reservation.status {
            ReservationStatus::Released | ReservationStatus::Expired => {
                tracing::debug!(%reservation_id, "release of terminal reservation ignored");
                return Ok(());
            }
            ReservationStatus::Confirmed => {
                return Err(InventoryError::InvalidState {
                    id: reservation_id,
                    actual: reservation.status,
                    action: "release",
                });
            }
            ReservationStatus::Reserved => {}
        }

        reservation.status = if reason == ReleaseReason::Expired {
            ReservationStatus::Expired
        } else {
            ReservationStatus::Released
        };
        let key = StockKey::new(reservation.product_id.clone(), reservation.variant_id.clone());
        let released = reservation.clone();
        drop(book);

        self.arena.restore(&key, released.quantity).await;

        metrics::counter!("inventory_reservations_released").increment(1);
        tracing::info!(
            %reservation_id,
            order_id = %released.order_id,
            reason = reason.as_str(),
            "reservation released"
        );

        if reason == ReleaseReason::Expired {
            metrics::counter!("inventory_reservations_expired").increment(1);
            let payload = ReservationFailedPayload {
                order_id: released.order_id,
                reason: REASON_EXPIRED.to_string(),
                lines: vec![FailedLine {
                    product_id: released.product_id,
                    variant_id: released.variant_id,
                    requested: released.quantity,
                    available: None,
                    reservation_id: Some(released.id),
                }],
                failed_at: Utc::now(),
            };
            self.publish(
                event_types::STOCK_RESERVATION_FAILED,
                released.order_id,
                &payload,
            )
            .await?;
        }

        Ok(())
    }

    /// Releases every still-active reservation of an order.
    ///
    /// Confirmed reservations are skipped with a warning rather than
    /// failing the bulk pass; terminal ones are no-ops. Returns how many
    /// holds were actually released.
    pub async fn release_all_for_order(
        &self,
        order_id: OrderId,
        reason: ReleaseReason,
    ) -> Result<u32> {
        let ids: Vec<ReservationId> = {
            let book = self.book.read().await;
            book.by_order.get(&order_id).cloned().unwrap_or_default()
        };

        let mut released = 0;
        for id in ids {
            let was_active = {
                let book = self.book.read().await;
                book.by_id.get(&id).is_some_and(Reservation::is_active)
            };
            match self.release(id, reason).await {
                Ok(()) => {
                    if was_active {
                        released += 1;
                    }
                }
                Err(InventoryError::InvalidState { id, actual, .. }) => {
                    tracing::warn!(reservation_id = %id, status = %actual, "skipping release of non-releasable reservation");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }

    /// Expires every active reservation whose TTL lapsed at `now`.
    ///
    /// Returns the ids that actually transitioned. A reservation confirmed
    /// between the scan and the release is left alone: `release` reports
    /// `InvalidState` and the sweep moves on.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<ReservationId>> {
        let lapsed: Vec<ReservationId> = {
            let book = self.book.read().await;
            book.by_id
                .values()
                .filter(|r| r.is_expired_at(now))
                .map(|r| r.id)
                .collect()
        };

        let mut expired = Vec::new();
        for id in lapsed {
            match self.release(id, ReleaseReason::Expired).await {
                Ok(()) => expired.push(id),
                Err(InventoryError::InvalidState { .. }) => {
                    tracing::debug!(reservation_id = %id, "reservation confirmed during sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    /// Returns a copy of a reservation.
    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        self.book.read().await.by_id.get(&reservation_id).cloned()
    }

    /// Returns all reservations belonging to an order.
    pub async fn reservations_for_order(&self, order_id: OrderId) -> Vec<Reservation> {
        let book = self.book.read().await;
        book.by_order
            .get(&order_id)
            .map(|ids| ids.iter().filter_map(|id| book.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    async fn publish<T: serde::Serialize>(
        &self,
        event_type: &str,
        order_id: OrderId,
        payload: &T,
    ) -> Result<()> {
        let envelope = EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_type("Inventory")
            .aggregate_id(order_id)
            .correlation_id(order_id)
            .payload(payload)?
            .build();
        self.bus.publish(envelope).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use event_bus::{EventHandler, HandlerError, InMemoryEventBus};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct CaptureHandler {
        envelopes: Mutex<Vec<EventEnvelope>>,
    }

    impl CaptureHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                envelopes: Mutex::new(Vec::new()),
            })
        }

        async fn captured(&self) -> Vec<EventEnvelope> {
            self.envelopes.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventHandler for CaptureHandler {
        fn name(&self) -> &'static str {
            "capture"
        }

        async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
            self.envelopes.lock().await.push(envelope.clone());
            Ok(())
        }
    }

    async fn engine_with_bus() -> (Arc<InventoryEngine<InMemoryEventBus>>, InMemoryEventBus) {
        let bus = InMemoryEventBus::new();
        (Arc::new(InventoryEngine::new(bus.clone())), bus)
    }

    fn line(sku: &str, quantity: u32) -> ReservationLine {
        ReservationLine::new(sku, None, quantity)
    }

    #[tokio::test]
    async fn reserve_decrements_available_and_emits_event() {
        let (engine, bus) = engine_with_bus().await;
        let capture = CaptureHandler::new();
        bus.subscribe(event_types::STOCK_RESERVED, capture.clone())
            .await;

        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(order_id, vec![line("SKU-001", 2)], 300)
            .await
            .unwrap();
        assert!(outcome.is_reserved());

        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 2);

        bus.wait_idle().await;
        let events = capture.captured().await;
        assert_eq!(events.len(), 1);
        let payload: StockReservedPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.order_id, order_id);
        assert_eq!(payload.lines.len(), 1);
        assert_eq!(events[0].correlation_id, Some(order_id.as_uuid()));
    }

    #[tokio::test]
    async fn rejection_reports_failing_lines_and_reserves_nothing() {
        let (engine, bus) = engine_with_bus().await;
        let capture = CaptureHandler::new();
        bus.subscribe(event_types::STOCK_RESERVATION_FAILED, capture.clone())
            .await;

        engine.set_stock("SKU-001", None, 5).await;
        engine.set_stock("SKU-002", None, 1).await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(
                order_id,
                vec![line("SKU-001", 2), line("SKU-002", 3)],
                300,
            )
            .await
            .unwrap();

        match outcome {
            ReserveOutcome::Rejected(failed) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].product_id.as_str(), "SKU-002");
                assert_eq!(failed[0].available, Some(1));
            }
            ReserveOutcome::Reserved(_) => panic!("expected rejection"),
        }

        assert_eq!(engine.stock("SKU-001", None).await.unwrap().available, 5);
        assert!(engine.reservations_for_order(order_id).await.is_empty());

        bus.wait_idle().await;
        let events = capture.captured().await;
        assert_eq!(events.len(), 1);
        let payload: ReservationFailedPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.reason, REASON_INSUFFICIENT_STOCK);
    }

    #[tokio::test]
    async fn unknown_product_rejection_reason() {
        let (engine, _bus) = engine_with_bus().await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(order_id, vec![line("SKU-404", 1)], 300)
            .await
            .unwrap();

        match outcome {
            ReserveOutcome::Rejected(failed) => {
                assert_eq!(failed[0].available, None);
            }
            ReserveOutcome::Reserved(_) => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn duplicate_active_reservation_is_an_error() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 10).await;
        let order_id = OrderId::new();

        engine
            .reserve(order_id, vec![line("SKU-001", 2)], 300)
            .await
            .unwrap();

        let result = engine.reserve(order_id, vec![line("SKU-001", 1)], 300).await;
        assert!(matches!(
            result,
            Err(InventoryError::DuplicateReservation { .. })
        ));

        // The rejected attempt must not leave its holds behind.
        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 8);
        assert_eq!(record.reserved, 2);
        assert_eq!(engine.reservations_for_order(order_id).await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_reservations_on_distinct_products_all_succeed() {
        let (engine, bus) = engine_with_bus().await;
        for i in 0..8 {
            engine.set_stock(format!("SKU-{i:03}"), None, 4).await;
        }

        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine
                    .reserve(OrderId::new(), vec![line(&format!("SKU-{i:03}"), 3)], 300)
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_reserved());
        }

        bus.wait_idle().await;
        for i in 0..8 {
            let record = engine.stock(format!("SKU-{i:03}"), None).await.unwrap();
            assert_eq!(record.available, 1);
            assert_eq!(record.reserved, 3);
        }
    }

    #[tokio::test]
    async fn confirm_consumes_without_restoring_available() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(order_id, vec![line("SKU-001", 2)], 300)
            .await
            .unwrap();
        let reservation_id = match outcome {
            ReserveOutcome::Reserved(r) => r[0].id,
            ReserveOutcome::Rejected(_) => panic!("expected success"),
        };

        let confirmed = engine.confirm(reservation_id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert!(confirmed.expires_at.is_none());

        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 0);

        // Strict confirm on a terminal reservation errors.
        let result = engine.confirm(reservation_id).await;
        assert!(matches!(result, Err(InventoryError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn confirm_unknown_reservation_is_not_found() {
        let (engine, _bus) = engine_with_bus().await;
        let result = engine.confirm(ReservationId::new()).await;
        assert!(matches!(
            result,
            Err(InventoryError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_restores_exactly_the_reserved_quantity() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(order_id, vec![line("SKU-001", 2)], 300)
            .await
            .unwrap();
        let reservation_id = match outcome {
            ReserveOutcome::Reserved(r) => r[0].id,
            ReserveOutcome::Rejected(_) => panic!("expected success"),
        };

        engine
            .release(reservation_id, ReleaseReason::Compensation)
            .await
            .unwrap();

        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);

        // Releasing again is a no-op.
        engine
            .release(reservation_id, ReleaseReason::Compensation)
            .await
            .unwrap();
        assert_eq!(engine.stock("SKU-001", None).await.unwrap().available, 5);
    }

    #[tokio::test]
    async fn releasing_confirmed_reservation_is_invalid_state() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();

        let outcome = engine
            .reserve(order_id, vec![line("SKU-001", 2)], 300)
            .await
            .unwrap();
        let reservation_id = match outcome {
            ReserveOutcome::Reserved(r) => r[0].id,
            ReserveOutcome::Rejected(_) => panic!("expected success"),
        };
        engine.confirm(reservation_id).await.unwrap();

        let result = engine
            .release(reservation_id, ReleaseReason::Compensation)
            .await;
        assert!(matches!(result, Err(InventoryError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn confirm_all_for_order_is_idempotent() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        engine.set_stock("SKU-002", None, 5).await;
        let order_id = OrderId::new();

        engine
            .reserve(
                order_id,
                vec![line("SKU-001", 1), line("SKU-002", 2)],
                300,
            )
            .await
            .unwrap();

        let first = engine.confirm_all_for_order(order_id).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = engine.confirm_all_for_order(order_id).await.unwrap();
        assert!(second.is_empty());

        assert_eq!(engine.stock("SKU-002", None).await.unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn confirm_all_fails_if_any_reservation_expired() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();

        engine
            .reserve(order_id, vec![line("SKU-001", 2)], 0)
            .await
            .unwrap();
        engine.sweep_expired(Utc::now()).await.unwrap();

        let result = engine.confirm_all_for_order(order_id).await;
        assert!(matches!(result, Err(InventoryError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_holds_and_emits_notice() {
        let (engine, bus) = engine_with_bus().await;
        let capture = CaptureHandler::new();
        bus.subscribe(event_types::STOCK_RESERVATION_FAILED, capture.clone())
            .await;

        engine.set_stock("SKU-001", None, 5).await;
        let order_id = OrderId::new();
        engine
            .reserve(order_id, vec![line("SKU-001", 2)], 0)
            .await
            .unwrap();

        let expired = engine.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);

        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);

        let reservation = engine.get_reservation(expired[0]).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);

        bus.wait_idle().await;
        let events = capture.captured().await;
        assert_eq!(events.len(), 1);
        let payload: ReservationFailedPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.reason, REASON_EXPIRED);
        assert_eq!(payload.lines[0].reservation_id, Some(expired[0]));
    }

    #[tokio::test]
    async fn sweep_leaves_confirmed_and_fresh_holds_alone() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;
        engine.set_stock("SKU-002", None, 5).await;

        let confirmed_order = OrderId::new();
        let outcome = engine
            .reserve(confirmed_order, vec![line("SKU-001", 1)], 0)
            .await
            .unwrap();
        let reservation_id = match outcome {
            ReserveOutcome::Reserved(r) => r[0].id,
            ReserveOutcome::Rejected(_) => panic!("expected success"),
        };
        engine.confirm(reservation_id).await.unwrap();

        let fresh_order = OrderId::new();
        engine
            .reserve(fresh_order, vec![line("SKU-002", 1)], 300)
            .await
            .unwrap();

        let expired = engine.sweep_expired(Utc::now()).await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn concurrent_orders_cannot_oversell() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 5).await;

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .reserve(OrderId::new(), vec![line("SKU-001", 3)], 300)
                    .await
                    .unwrap()
            })
        };
        let second = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .reserve(OrderId::new(), vec![line("SKU-001", 3)], 300)
                    .await
                    .unwrap()
            })
        };

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        let wins = outcomes.iter().filter(|o| o.is_reserved()).count();
        assert_eq!(wins, 1);

        let record = engine.stock("SKU-001", None).await.unwrap();
        assert_eq!(record.available, 2);
        assert_eq!(record.reserved, 3);
    }

    #[tokio::test]
    async fn adjust_stock_applies_movement() {
        let (engine, _bus) = engine_with_bus().await;
        engine.set_stock("SKU-001", None, 2).await;

        let record = engine
            .adjust_stock(
                ProductId::new("SKU-001"),
                None,
                3,
                StockMovementReason::Purchase,
            )
            .await
            .unwrap();
        assert_eq!(record.available, 5);

        let result = engine
            .adjust_stock(
                ProductId::new("SKU-001"),
                None,
                -10,
                StockMovementReason::Correction,
            )
            .await;
        assert!(matches!(
            result,
            Err(InventoryError::InvalidAdjustment { available: 5, .. })
        ));
    }
}
