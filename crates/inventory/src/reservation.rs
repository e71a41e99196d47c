//! Reservation lifecycle.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, ReservationId, VariantId};
use serde::{Deserialize, Serialize};

/// The state of a stock reservation.
///
/// State transitions:
/// ```text
/// Reserved ──┬──► Confirmed   (stock permanently consumed)
///            ├──► Released    (stock restored)
///            └──► Expired     (stock restored by the sweeper)
/// ```
/// Confirmed, Released and Expired are terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Stock is held, awaiting confirmation, subject to TTL expiry.
    #[default]
    Reserved,

    /// The hold was converted into a permanent deduction (terminal).
    Confirmed,

    /// The hold was explicitly undone and stock restored (terminal).
    Released,

    /// The TTL lapsed without confirmation and stock was restored (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true if the reservation can be confirmed in this state.
    pub fn can_confirm(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    /// Returns true if the reservation can be released in this state.
    pub fn can_release(&self) -> bool {
        matches!(self, ReservationStatus::Reserved)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Reserved)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded hold on stock tied to one order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier.
    pub id: ReservationId,

    /// The order this hold belongs to.
    pub order_id: OrderId,

    /// The product being held.
    pub product_id: ProductId,

    /// Optional product variant.
    pub variant_id: Option<VariantId>,

    /// Units held.
    pub quantity: u32,

    /// Current lifecycle state.
    pub status: ReservationStatus,

    /// When the hold lapses if not confirmed. None once confirmed.
    pub expires_at: Option<DateTime<Utc>>,

    /// When the hold was created.
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Returns true if the reservation is still an active hold.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }

    /// Returns true if the hold has lapsed at the given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at <= now)
    }
}
