//! Payload shapes for inventory events.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ReservationId, VariantId};
use serde::{Deserialize, Serialize};

/// One successfully reserved line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservedLine {
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

/// Payload of `stock.reserved`: one event per request covering all lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservedPayload {
    pub order_id: OrderId,
    pub lines: Vec<ReservedLine>,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One line that could not be satisfied, or an expired hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub requested: u32,
    /// Units available at check time. None when the product is unknown
    /// or the line reports an expiry rather than a shortfall.
    pub available: Option<u32>,
    /// Set when the line reports an expired reservation.
    pub reservation_id: Option<ReservationId>,
}

/// Payload of `stock.reservation_failed`.
///
/// Emitted both for rejected reservation requests (reason
/// `INSUFFICIENT_STOCK` / `UNKNOWN_PRODUCT`) and for TTL expiry notices
/// from the sweeper (reason `EXPIRED`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationFailedPayload {
    pub order_id: OrderId,
    pub reason: String,
    pub lines: Vec<FailedLine>,
    pub failed_at: DateTime<Utc>,
}

/// Reason string for insufficient-stock rejections.
pub const REASON_INSUFFICIENT_STOCK: &str = "INSUFFICIENT_STOCK";

/// Reason string for unknown-product rejections.
pub const REASON_UNKNOWN_PRODUCT: &str = "UNKNOWN_PRODUCT";

/// Reason string for TTL expiry notices.
pub const REASON_EXPIRED: &str = "EXPIRED";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_payload_roundtrip() {
        let payload = StockReservedPayload {
            order_id: OrderId::new(),
            lines: vec![ReservedLine {
                reservation_id: ReservationId::new(),
                product_id: ProductId::new("SKU-001"),
                variant_id: Some(VariantId::new("blue")),
                quantity: 2,
            }],
            reserved_at: Utc::now(),
            expires_at: Utc::now(),
        };

        let json = serde_json::to_string(&payload).unwrap();
        let deserialized: StockReservedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.order_id, payload.order_id);
        assert_eq!(deserialized.lines.len(), 1);
        assert_eq!(deserialized.lines[0].quantity, 2);
    }

    #[test]
    fn failed_payload_roundtrip() {
        let payload = ReservationFailedPayload {
            order_id: OrderId::new(),
            reason: REASON_INSUFFICIENT_STOCK.to_string(),
            lines: vec![FailedLine {
                product_id: ProductId::new("SKU-001"),
                variant_id: None,
                requested: 3,
                available: Some(1),
                reservation_id: None,
            }],
            failed_at: Utc::now(),
        };

        let json = serde_json::to_string(&payload).unwrap();
        let deserialized: ReservationFailedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.reason, "INSUFFICIENT_STOCK");
        assert_eq!(deserialized.lines[0].available, Some(1));
    }
}
