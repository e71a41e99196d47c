//! In-memory event bus implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use uuid::Uuid;

use crate::bus::{EventBus, EventHandler, RetryPolicy};
use crate::envelope::EventEnvelope;
use crate::error::Result;

/// An envelope parked after its retry budget was exhausted.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The envelope that could not be delivered.
    pub envelope: EventEnvelope,
    /// The handler that kept failing.
    pub handler: &'static str,
    /// The last error message.
    pub error: String,
    /// How many delivery attempts were made.
    pub attempts: u32,
}

struct BusInner {
    subscriptions: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    // One dispatch task per routing key keeps per-saga emission order.
    workers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<EventEnvelope>>>,
    dead_letters: RwLock<Vec<DeadLetter>>,
    in_flight: AtomicUsize,
    idle: Notify,
    policy: RetryPolicy,
}

/// In-memory event bus.
///
/// Provides the same delivery contract as a real broker: at-least-once,
/// ordered per routing key, unordered across keys, with handler retry and
/// dead-lettering. Used by the saga crate directly and by every test.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<BusInner>,
}

impl InMemoryEventBus {
    /// Creates a bus with the default retry policy.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    /// Creates a bus with a custom retry policy.
    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                dead_letters: RwLock::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                policy,
            }),
        }
    }

    /// Waits until every accepted envelope has been delivered (or parked).
    ///
    /// Deterministic synchronization point for tests and for graceful
    /// shutdown; production callers never need it.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns all parked envelopes.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.read().await.clone()
    }

    /// Returns the number of parked envelopes.
    pub async fn dead_letter_count(&self) -> usize {
        self.inner.dead_letters.read().await.len()
    }

    async fn dispatch_loop(inner: Arc<BusInner>, mut rx: mpsc::UnboundedReceiver<EventEnvelope>) {
        while let Some(envelope) = rx.recv().await {
            Self::deliver(&inner, envelope).await;
            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        }
    }

    async fn deliver(inner: &Arc<BusInner>, envelope: EventEnvelope) {
        let handlers: Vec<Arc<dyn EventHandler>> = inner
            .subscriptions
            .read()
            .await
            .get(&envelope.event_type)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            let mut attempt: u32 = 1;
            loop {
                match handler.handle(&envelope).await {
                    Ok(()) => break,
                    Err(e) if attempt < inner.policy.max_attempts => {
                        tracing::debug!(
                            event_id = %envelope.event_id,
                            event_type = %envelope.event_type,
                            handler = handler.name(),
                            attempt,
                            error = %e,
                            "handler failed, retrying"
                        );
                        metrics::counter!("bus_handler_retries").increment(1);
                        tokio::time::sleep(inner.policy.delay_for(attempt)).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            event_id = %envelope.event_id,
                            event_type = %envelope.event_type,
                            handler = handler.name(),
                            attempts = attempt,
                            error = %e,
                            "retry budget exhausted, parking envelope"
                        );
                        metrics::counter!("bus_dead_letters").increment(1);
                        inner.dead_letters.write().await.push(DeadLetter {
                            envelope: envelope.clone(),
                            handler: handler.name(),
                            error: e.message,
                            attempts: attempt,
                        });
                        break;
                    }
                }
            }
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        metrics::counter!("bus_events_published").increment(1);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        let key = envelope.routing_key();
        let mut workers = self.inner.workers.lock().await;
        let sender = workers.entry(key).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(Self::dispatch_loop(Arc::clone(&self.inner), rx));
            tx
        });

        // The receiver lives as long as the bus, so send cannot fail while
        // the entry exists.
        sender
            .send(envelope)
            .map_err(|e| crate::error::BusError::Publish(e.to_string()))
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.inner
            .subscriptions
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }
}
