//! # Event bus.
//!
//! [`Bus`] wraps a [`tokio::sync::broadcast`] channel. The connector, every
//! generation and the subscriber workers publish into it; the supervisor reads
//! it once and forwards to the [`SubscriberSet`](crate::SubscriberSet). Tests
//! and callers may take their own receivers through [`Bus::subscribe`].
//!
//! ```text
//!   Connector ──┐
//!   Generation ─┼──► Bus ──┬──► subscriber_listener ──► SubscriberSet
//!   Subscribers ┘          └──► Supervisor::bus().subscribe()  (callers, tests)
//! ```
//!
//! Publishing never waits. The ring buffer is shared by all receivers; a receiver
//! that falls more than `capacity` events behind gets `RecvError::Lagged(n)`.
//! Events sent while nobody listens are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Clones share the same channel.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Sends `ev` to every current receiver.
    pub fn publish(&self, ev: Event) {
        // No receivers is not an error.
        let _ = self.tx.send(ev);
    }

    /// Returns a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
