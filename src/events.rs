//! Record-changed event fanout
//!
//! The [`EventBus`] broadcasts every changed [`Download`] to all attached
//! subscribers. Each subscriber owns an independent bounded buffer; when it
//! is full the incoming event is dropped for that subscriber and emit
//! returns immediately — the engine never blocks on a slow consumer. The
//! store holds the canonical state, so events are refresh hints and loss is
//! acceptable; a reconnecting subscriber reads the store to catch up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::Download;

/// Lossy multi-subscriber broadcast of download records.
#[derive(Debug)]
pub struct EventBus {
    subscribers: Arc<parking_lot::Mutex<Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Download>,
}

impl EventBus {
    /// Creates a bus whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(parking_lot::Mutex::new(Vec::new())),
            capacity,
            next_id: AtomicU64::new(0),
        }
    }

    /// Attaches a new subscriber. Dropping the returned stream detaches it.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, tx });
        EventStream {
            id,
            rx,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Delivers an event to every live subscriber without blocking.
    ///
    /// Subscribers whose buffer is full miss this event; subscribers whose
    /// stream was dropped are pruned.
    pub fn emit(&self, item: Download) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| match s.tx.try_send(item.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(subscriber = s.id, path = %item.path, "Subscriber buffer full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A subscription to record-changed events.
#[derive(Debug)]
pub struct EventStream {
    id: u64,
    rx: mpsc::Receiver<Download>,
    subscribers: std::sync::Weak<parking_lot::Mutex<Vec<Subscriber>>>,
}

impl EventStream {
    /// Receives the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Download> {
        self.rx.recv().await
    }

    /// Non-blocking receive of an already-buffered event.
    pub fn try_recv(&mut self) -> Option<Download> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}
