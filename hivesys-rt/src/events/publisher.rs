//! Broadcast publisher for lifecycle events.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use tokio::sync::broadcast;
use tracing::trace;

// Layer 3: Internal module imports
use super::types::{LifecycleEvent, LifecycleEventKind};

/// Default ring-buffer capacity per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Process-wide lifecycle event publisher.
///
/// Cloning is cheap; every clone publishes into the same stream. Publishing
/// never blocks: subscribers that fall more than the ring capacity behind
/// lose the oldest events rather than stalling the emitter.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given per-subscriber ring capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted after this point.
    ///
    /// A subscription created during a publication need not observe the
    /// in-flight event.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish an event, stamping it with the current time.
    pub fn publish(&self, kind: LifecycleEventKind) {
        let event = LifecycleEvent::now(kind);
        trace!(event = ?event.kind, "lifecycle event");
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A handle to receive lifecycle events.
pub struct EventSubscription {
    rx: broadcast::Receiver<LifecycleEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// Returns `None` once the publisher is gone and the backlog is drained.
    /// A lagged subscriber silently skips the events it lost.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is immediately available.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
