//! Background task expiring lapsed reservation holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use event_bus::EventBus;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::InventoryEngine;

/// Periodically expires reservations whose TTL lapsed.
///
/// The sweep is what enforces TTLs: until it runs, a lapsed hold still
/// counts against `available` and can still be confirmed by a racing
/// payment. The interval bounds how long lapsed units stay invisible to
/// other orders.
pub struct ExpirySweeper<B: EventBus + 'static> {
    engine: Arc<InventoryEngine<B>>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl<B: EventBus + 'static> ExpirySweeper<B> {
    /// Creates a sweeper over the given engine.
    pub fn new(engine: Arc<InventoryEngine<B>>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Spawns the sweep loop. The task runs until [`stop`](Self::stop).
    pub fn spawn(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let interval = self.interval;
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is not a sweep.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.sweep_expired(Utc::now()).await {
                            Ok(expired) if !expired.is_empty() => {
                                tracing::info!(count = expired.len(), "expired lapsed reservations");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "expiry sweep failed");
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        tracing::debug!("expiry sweeper stopping");
                        return;
                    }
                }
            }
        })
    }

    /// Signals the sweep loop to stop.
    ///
    /// Uses a stored permit so a stop issued before the loop reaches its
    /// select point is not lost.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}
