//! Event bus for broadcasting runtime events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] for the supervisor, acceptor
//! and dispatch workers, and accounts for both failure modes of a
//! broadcast channel instead of hiding them:
//!
//! - **No receiver attached** when an event is published: the event is
//!   lost and counted; [`Bus::lost`] exposes the running total so an
//!   embedder can tell a quiet server from one logging into the void.
//! - **Receiver falls behind** the ring buffer: the receiver observes
//!   `RecvError::Lagged(n)`; the fan-out listener turns that into an
//!   [`EventKind::EventsLagged`](crate::events::EventKind::EventsLagged)
//!   diagnostic via [`Event::events_lagged`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::Event;

/// Broadcast channel for runtime events with lost-event accounting.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    lost: Arc<AtomicU64>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            lost: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publishes an event to all subscribers.
    ///
    /// An event published while no receiver is attached is gone; it is
    /// counted in [`Bus::lost`] rather than silently discarded.
    pub fn publish(&self, ev: Event) {
        if self.tx.send(ev).is_err() {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of events published with no live receiver.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn events_without_receivers_are_counted() {
        let bus = Bus::new(8);
        bus.publish(Event::now(EventKind::ConnAccepted));
        bus.publish(Event::now(EventKind::ConnClosed));
        assert_eq!(bus.lost(), 2);
    }

    #[tokio::test]
    async fn delivered_events_are_not_counted() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(Event::now(EventKind::ConnAccepted));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ConnAccepted);
        assert_eq!(bus.lost(), 0);
    }

    #[tokio::test]
    async fn clones_share_the_lost_counter() {
        let bus = Bus::new(8);
        let clone = bus.clone();
        clone.publish(Event::now(EventKind::ConnClosed));
        assert_eq!(bus.lost(), 1);
    }
}
