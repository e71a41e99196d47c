//! The order aggregate.

use chrono::{DateTime, Utc};
use common::{Address, Currency, Money, OrderId, ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};
use crate::status::OrderStatus;

/// One ordered line with its price locked at order time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl LineItem {
    /// Creates a line item, computing its total from the unit price.
    pub fn new(
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
            quantity,
            line_total: unit_price.multiply(quantity),
            unit_price,
        }
    }
}

/// An order and its immutable pricing snapshot.
///
/// `total_amount` equals the sum of line totals at creation and never
/// changes afterwards; only `status` and `updated_at` mutate, through the
/// guarded transition methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub line_items: Vec<LineItem>,
    pub currency: Currency,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an order in `CREATED`, locking prices and the total.
    pub fn new(
        user_id: UserId,
        line_items: Vec<LineItem>,
        currency: Currency,
        shipping_address: Address,
        billing_address: Option<Address>,
    ) -> Result<Self> {
        if line_items.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        for item in &line_items {
            if item.quantity == 0 {
                return Err(OrderError::ZeroQuantity {
                    product_id: item.product_id.clone(),
                });
            }
        }

        let total_amount = line_items.iter().map(|l| l.line_total).sum();
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            line_items,
            currency,
            total_amount,
            status: OrderStatus::Created,
            shipping_address,
            billing_address,
            created_at: now,
            updated_at: now,
        })
    }

    /// All lines were reserved; the order now awaits payment.
    pub fn await_payment(&mut self) -> Result<()> {
        self.transition(OrderStatus::PendingPayment, OrderStatus::can_await_payment)
    }

    /// Payment settled.
    pub fn mark_paid(&mut self) -> Result<()> {
        self.transition(OrderStatus::Paid, OrderStatus::can_mark_paid)
    }

    /// Payment was declined or the provider was unreachable.
    pub fn fail_payment(&mut self) -> Result<()> {
        self.transition(OrderStatus::PaymentFailed, OrderStatus::can_fail_payment)
    }

    /// Terminal cancellation; only reachable before the order is paid.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(OrderStatus::Cancelled, OrderStatus::can_cancel)
    }

    /// Fulfillment started.
    pub fn dispatch_fulfillment(&mut self) -> Result<()> {
        self.transition(OrderStatus::Fulfilling, OrderStatus::can_dispatch)
    }

    /// Fulfillment finished; terminal happy path.
    pub fn complete_fulfillment(&mut self) -> Result<()> {
        self.transition(
            OrderStatus::Fulfilled,
            OrderStatus::can_complete_fulfillment,
        )
    }

    fn transition(&mut self, to: OrderStatus, guard: fn(&OrderStatus) -> bool) -> Result<()> {
        if !guard(&self.status) {
            return Err(OrderError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        tracing::debug!(order_id = %self.id, from = %self.status, %to, "order transition");
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address::new("1 Main St", "Springfield", "US")
    }

    fn two_line_order() -> Order {
        Order::new(
            UserId::new(),
            vec![
                LineItem::new("SKU-001", None, 2, Money::from_cents(1500)),
                LineItem::new("SKU-002", Some("blue-xl".into()), 1, Money::from_cents(999)),
            ],
            Currency::Usd,
            address(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn total_is_the_sum_of_line_totals() {
        let order = two_line_order();
        assert_eq!(order.total_amount, Money::from_cents(2 * 1500 + 999));
        assert_eq!(order.line_items[0].line_total, Money::from_cents(3000));
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[test]
    fn empty_order_is_rejected() {
        let result = Order::new(UserId::new(), vec![], Currency::Usd, address(), None);
        assert!(matches!(result, Err(OrderError::EmptyOrder)));
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let result = Order::new(
            UserId::new(),
            vec![LineItem::new("SKU-001", None, 0, Money::from_cents(100))],
            Currency::Usd,
            address(),
            None,
        );
        assert!(matches!(result, Err(OrderError::ZeroQuantity { .. })));
    }

    #[test]
    fn happy_path_transitions() {
        let mut order = two_line_order();
        order.await_payment().unwrap();
        order.mark_paid().unwrap();
        order.dispatch_fulfillment().unwrap();
        order.complete_fulfillment().unwrap();
        assert_eq!(order.status, OrderStatus::Fulfilled);
    }

    #[test]
    fn payment_failure_path() {
        let mut order = two_line_order();
        order.await_payment().unwrap();
        order.fail_payment().unwrap();
        order.cancel().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn paid_order_cannot_be_cancelled() {
        let mut order = two_line_order();
        order.await_payment().unwrap();
        order.mark_paid().unwrap();

        let result = order.cancel();
        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn double_paid_is_an_invalid_transition() {
        let mut order = two_line_order();
        order.await_payment().unwrap();
        order.mark_paid().unwrap();
        assert!(order.mark_paid().is_err());
    }
}
