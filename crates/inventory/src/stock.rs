//! Stock records and the sharded arena that serializes updates per key.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use chrono::{DateTime, Utc};
use common::{ProductId, VariantId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Number of lock shards in the arena.
const SHARD_COUNT: usize = 16;

/// Identity of a stock record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl StockKey {
    /// Creates a stock key.
    pub fn new(product_id: impl Into<ProductId>, variant_id: Option<VariantId>) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Counters for one product/variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StockRecord {
    /// Uncommitted, sellable units. Never negative.
    pub available: u32,

    /// Units held by active reservations.
    pub reserved: u32,

    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    fn new(available: u32) -> Self {
        Self {
            available,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Reason attached to a manual stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockMovementReason {
    Purchase,
    Return,
    ManualAdjust,
    Correction,
}

impl StockMovementReason {
    /// Returns the reason name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StockMovementReason::Purchase => "PURCHASE",
            StockMovementReason::Return => "RETURN",
            StockMovementReason::ManualAdjust => "MANUAL_ADJUST",
            StockMovementReason::Correction => "CORRECTION",
        }
    }
}

/// Why a reservation line could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShortfall {
    /// No stock record exists for the key.
    UnknownProduct,
    /// The record exists but holds fewer units than requested.
    InsufficientStock { available: u32 },
}

/// Arena of stock records with per-key serialized updates.
///
/// Records are spread over a fixed set of lock shards keyed by the hash of
/// the stock key, so two concurrent reservation attempts for the same
/// product serialize on one mutex while unrelated products proceed in
/// parallel. Multi-line requests lock every affected shard in ascending
/// index order, which makes the whole request atomic and deadlock-free.
pub struct ShardedStockArena {
    shards: Vec<Mutex<HashMap<StockKey, StockRecord>>>,
}

impl ShardedStockArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_index(&self, key: &StockKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Creates or replaces the record for a key with the given availability.
    pub async fn set_stock(&self, key: StockKey, available: u32) {
        let mut shard = self.shards[self.shard_index(&key)].lock().await;
        shard.insert(key, StockRecord::new(available));
    }

    /// Returns a copy of the record for a key.
    pub async fn get(&self, key: &StockKey) -> Option<StockRecord> {
        let shard = self.shards[self.shard_index(key)].lock().await;
        shard.get(key).copied()
    }

    /// Applies a signed delta to `available`.
    ///
    /// Adjusting an unknown key with a non-negative delta creates the
    /// record (initial stock receipt). Returns the updated record, or the
    /// shortfall when the delta would drive the count negative.
    pub async fn adjust_available(
        &self,
        key: &StockKey,
        delta: i64,
    ) -> Result<StockRecord, LineShortfall> {
        let mut shard = self.shards[self.shard_index(key)].lock().await;
        if !shard.contains_key(key) {
            if delta < 0 {
                return Err(LineShortfall::UnknownProduct);
            }
            shard.insert(key.clone(), StockRecord::new(0));
        }
        let record = shard.get_mut(key).expect("inserted above");

        let next = record.available as i64 + delta;
        if next < 0 {
            return Err(LineShortfall::InsufficientStock {
                available: record.available,
            });
        }
        record.available = next as u32;
        record.touch();
        Ok(*record)
    }

    /// Atomically checks and decrements `available` for every line.
    ///
    /// All-or-nothing: if any line cannot be satisfied no record is touched
    /// and the shortfalls are reported per key. On success each line's
    /// quantity moves from `available` to `reserved`.
    pub async fn try_reserve_all(
        &self,
        lines: &[(StockKey, u32)],
    ) -> Result<(), Vec<(StockKey, LineShortfall)>> {
        // Total demand per key: a request may name the same key twice.
        let mut demand: HashMap<&StockKey, u32> = HashMap::new();
        for (key, quantity) in lines {
            *demand.entry(key).or_default() += quantity;
        }

        // Lock affected shards in ascending index order.
        let mut indices: Vec<usize> = demand.keys().map(|k| self.shard_index(k)).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = HashMap::with_capacity(indices.len());
        for index in indices {
            guards.insert(index, self.shards[index].lock().await);
        }

        let mut shortfalls = Vec::new();
        for (key, &quantity) in &demand {
            let shard = &guards[&self.shard_index(key)];
            match shard.get(*key) {
                None => shortfalls.push(((*key).clone(), LineShortfall::UnknownProduct)),
                Some(record) if record.available < quantity => shortfalls.push((
                    (*key).clone(),
                    LineShortfall::InsufficientStock {
                        available: record.available,
                    },
                )),
                Some(_) => {}
            }
        }

        if !shortfalls.is_empty() {
            return Err(shortfalls);
        }

        for (key, &quantity) in &demand {
            let shard = guards.get_mut(&self.shard_index(key)).expect("shard locked");
            let record = shard.get_mut(*key).expect("checked above");
            record.available -= quantity;
            record.reserved += quantity;
            record.touch();
        }

        Ok(())
    }

    /// Moves a quantity from `reserved` back to `available` (release/expiry).
    pub async fn restore(&self, key: &StockKey, quantity: u32) {
        let mut shard = self.shards[self.shard_index(key)].lock().await;
        if let Some(record) = shard.get_mut(key) {
            record.available += quantity;
            record.reserved = record.reserved.saturating_sub(quantity);
            record.touch();
        }
    }

    /// Drops a quantity from `reserved` (confirmation: units permanently
    /// consumed, `available` already reflects the deduction).
    pub async fn consume(&self, key: &StockKey, quantity: u32) {
        let mut shard = self.shards[self.shard_index(key)].lock().await;
        if let Some(record) = shard.get_mut(key) {
            record.reserved = record.reserved.saturating_sub(quantity);
            record.touch();
        }
    }
}

impl Default for ShardedStockArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sku: &str) -> StockKey {
        StockKey::new(sku, None)
    }

    #[tokio::test]
    async fn set_and_get_stock() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;

        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);
    }

    #[tokio::test]
    async fn reserve_moves_available_to_reserved() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;

        arena.try_reserve_all(&[(key("SKU-001"), 2)]).await.unwrap();

        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 2);
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;
        arena.set_stock(key("SKU-002"), 1).await;

        let result = arena
            .try_reserve_all(&[(key("SKU-001"), 2), (key("SKU-002"), 3)])
            .await;

        let shortfalls = result.unwrap_err();
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].0, key("SKU-002"));
        assert_eq!(
            shortfalls[0].1,
            LineShortfall::InsufficientStock { available: 1 }
        );

        // Nothing was touched, including the satisfiable line.
        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_reported() {
        let arena = ShardedStockArena::new();
        let result = arena.try_reserve_all(&[(key("SKU-404"), 1)]).await;

        let shortfalls = result.unwrap_err();
        assert_eq!(shortfalls[0].1, LineShortfall::UnknownProduct);
    }

    #[tokio::test]
    async fn duplicate_lines_are_accumulated() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;

        // 3 + 3 exceeds the available 5 even though each line alone fits.
        let result = arena
            .try_reserve_all(&[(key("SKU-001"), 3), (key("SKU-001"), 3)])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn restore_returns_units_to_available() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;
        arena.try_reserve_all(&[(key("SKU-001"), 2)]).await.unwrap();

        arena.restore(&key("SKU-001"), 2).await;

        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 5);
        assert_eq!(record.reserved, 0);
    }

    #[tokio::test]
    async fn consume_drops_reserved_without_touching_available() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 5).await;
        arena.try_reserve_all(&[(key("SKU-001"), 2)]).await.unwrap();

        arena.consume(&key("SKU-001"), 2).await;

        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 3);
        assert_eq!(record.reserved, 0);
    }

    #[tokio::test]
    async fn adjust_available_rejects_negative_result() {
        let arena = ShardedStockArena::new();
        arena.set_stock(key("SKU-001"), 2).await;

        let result = arena.adjust_available(&key("SKU-001"), -5).await;
        assert_eq!(
            result.unwrap_err(),
            LineShortfall::InsufficientStock { available: 2 }
        );

        let record = arena.adjust_available(&key("SKU-001"), 3).await.unwrap();
        assert_eq!(record.available, 5);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_oversell() {
        use std::sync::Arc;

        let arena = Arc::new(ShardedStockArena::new());
        arena.set_stock(key("SKU-001"), 10).await;

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let arena = Arc::clone(&arena);
            tasks.push(tokio::spawn(async move {
                arena.try_reserve_all(&[(key("SKU-001"), 3)]).await.is_ok()
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }

        // 10 units, 3 per request: exactly 3 requests can win.
        assert_eq!(successes, 3);
        let record = arena.get(&key("SKU-001")).await.unwrap();
        assert_eq!(record.available, 1);
        assert_eq!(record.reserved, 9);
    }
}
