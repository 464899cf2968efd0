//! Debounced batch dispatch.
//!
//! Items pushed in quick succession are coalesced into a single delivery:
//! every push starts a fresh debounce window, and only the window armed by
//! the newest push delivers. Superseded windows notice via a generation
//! counter and do nothing, so a batch that has been taken for delivery is
//! always delivered whole; nothing is aborted mid-flight.

use async_trait::async_trait;
use log::warn;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives coalesced batches. Delivery failures are the sink's problem to
/// report; the batcher logs them and moves on.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn deliver(&self, items: Vec<T>) -> Result<(), anyhow::Error>;
}

struct Pending<T> {
    items: Vec<T>,
    // Bumped on every push/clear; a timer only fires for its own generation.
    generation: u64,
}

pub struct Batcher<T> {
    pending: Arc<Mutex<Pending<T>>>,
    window: Duration,
    sink: Arc<dyn BatchSink<T>>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new(window: Duration, sink: Arc<dyn BatchSink<T>>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Pending {
                items: Vec::new(),
                generation: 0,
            })),
            window,
            sink,
        }
    }

    /// Appends an item and restarts the debounce window. The pending batch
    /// is delivered once no push arrives for a full window.
    pub fn push_item(&self, item: T) {
        let generation = {
            let mut pending = self.pending.lock().unwrap();
            pending.items.push(item);
            pending.generation += 1;
            pending.generation
        };

        let pending = self.pending.clone();
        let sink = self.sink.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let items = {
                let mut pending = pending.lock().unwrap();
                // A later push or clear owns the window now.
                if pending.generation != generation {
                    return;
                }
                std::mem::take(&mut pending.items)
            };
            if items.is_empty() {
                return;
            }
            if let Err(err) = sink.deliver(items).await {
                warn!(target: "Batcher", "batch delivery failed: {err:?}");
            }
        });
    }

    /// Drops everything accumulated so far and invalidates the pending
    /// window. Nothing is delivered.
    pub fn clear_items(&self) {
        let mut pending = self.pending.lock().unwrap();
        pending.items.clear();
        pending.generation += 1;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().items.len()
    }
}

impl<T> Drop for Batcher<T> {
    fn drop(&mut self) {
        // Outstanding timers become no-ops.
        let mut pending = self.pending.lock().unwrap();
        pending.items.clear();
        pending.generation += 1;
    }
}
