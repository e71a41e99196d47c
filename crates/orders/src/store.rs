//! In-memory order repository.

use std::collections::HashMap;

use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{OrderError, Result};
use crate::order::Order;

/// In-memory order store.
///
/// `update` runs a closure against the stored order under the write lock,
/// so a state-guarded transition and its persistence are one atomic step
/// from the point of view of concurrent updaters.
#[derive(Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl OrderStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new order.
    pub async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderError::AlreadyExists { id: order.id });
        }
        orders.insert(order.id, order);
        Ok(())
    }

    /// Returns a copy of an order.
    pub async fn get(&self, order_id: OrderId) -> Option<Order> {
        self.orders.read().await.get(&order_id).cloned()
    }

    /// Applies a mutation to a stored order and returns the updated copy.
    ///
    /// The closure's error aborts the update with the order untouched.
    pub async fn update<F>(&self, order_id: OrderId, f: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> Result<()>,
    {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;
        f(order)?;
        Ok(order.clone())
    }

    /// Whether an order with this id exists.
    pub async fn contains(&self, order_id: OrderId) -> bool {
        self.orders.read().await.contains_key(&order_id)
    }
}
