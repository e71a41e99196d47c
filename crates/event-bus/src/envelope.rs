//! The shared event envelope shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type names used on the bus.
pub mod event_types {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_CANCELLED: &str = "order.cancelled";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const STOCK_RESERVED: &str = "stock.reserved";
    pub const STOCK_RESERVATION_FAILED: &str = "stock.reservation_failed";
}

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable event envelope carrying identity and causal metadata.
///
/// Envelopes are never mutated after emission. Consumers must be idempotent
/// keyed on `event_id` because the transport delivers at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "stock.reserved").
    pub event_type: String,

    /// The type of aggregate that emitted the event (e.g., "Order").
    pub aggregate_type: String,

    /// The aggregate this event is about.
    pub aggregate_id: Uuid,

    /// Request-scoped id threading through every envelope of one saga run.
    pub correlation_id: Option<Uuid>,

    /// The event or request that caused this one.
    pub causation_id: Option<EventId>,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Payload schema version.
    pub schema_version: u32,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// The key ordered delivery is scoped to.
    ///
    /// Events of one saga run share a correlation id (the order id), so
    /// routing by it preserves emission order across aggregates of the same
    /// saga while letting unrelated sagas interleave freely.
    pub fn routing_key(&self) -> Uuid {
        self.correlation_id.unwrap_or(self.aggregate_id)
    }

    /// Deserializes the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_type: Option<String>,
    aggregate_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    causation_id: Option<EventId>,
    occurred_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    schema_version: Option<u32>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: impl Into<Uuid>) -> Self {
        self.aggregate_id = Some(id.into());
        self
    }

    /// Sets the correlation ID that threads through a saga run.
    pub fn correlation_id(mut self, id: impl Into<Uuid>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the ID of the event that caused this one.
    pub fn causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Sets the occurred-at timestamp. Defaults to now.
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the payload schema version. Defaults to 1.
    pub fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_type, aggregate_id,
    /// payload) are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            payload: self.payload.expect("payload is required"),
            schema_version: self.schema_version.unwrap_or(1),
            metadata: self.metadata,
        }
    }
}
