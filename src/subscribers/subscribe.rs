//! # Subscriber contract.
//!
//! A [`Subscribe`] implementation observes the supervisor from outside: dial
//! attempts, generations coming and going, initializer failures. Each one gets
//! its own worker and bounded queue inside the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet), so a slow subscriber
//! never delays a reconnect.
//!
//! [`Subscribe::accepts`] filters by [`EventKind`] before anything is queued; a
//! subscriber that only cares about connection health does not spend queue
//! space on per-initializer events.
//!
//! ## Example
//! ```rust
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use rabbitvisor::{Event, EventKind, Subscribe};
//!
//! struct LastReadyGeneration(AtomicU64);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for LastReadyGeneration {
//!     async fn on_event(&self, ev: &Event) {
//!         if let Some(generation) = ev.generation {
//!             self.0.store(generation, Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "last-ready-generation" }
//!     fn accepts(&self, kind: EventKind) -> bool { kind == EventKind::GenerationReady }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Observer of supervisor events.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one accepted event. Runs on the subscriber's own worker.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events and logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue. Clamped to at least 1.
    fn queue_capacity(&self) -> usize {
        256
    }

    /// Whether events of `kind` are delivered at all.
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}
