//! # Subscriber fan-out.
//!
//! [`SubscriberSet`] hands every bus event to each interested subscriber
//! without ever waiting on one. The supervisor's listener calls
//! [`SubscriberSet::emit`] from the bus loop, so emit must stay non-blocking
//! even while a subscriber is stuck.
//!
//! ```text
//! emit(ev) ─┬─ accepts(ev.kind)? ─► try_send ─► [queue] ─► worker ─► on_event
//!           │                          └─ full ─► count drop, SubscriberOverflow once per burst
//!           └─ ...one slot per subscriber
//! ```
//!
//! ## Overflow bursts
//! A subscriber that falls behind during a reconnect storm would otherwise
//! produce one overflow event per dropped event, feeding the storm. Instead the
//! first drop of a burst publishes `SubscriberOverflow` (tagged with the
//! generation of the dropped event) and later drops are only counted. The burst
//! ends at the next event the queue accepts; the count is logged then.
//!
//! ## Panics
//! A panicking `on_event` is caught, reported as `SubscriberPanicked` and the
//! worker keeps going with the next event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Slot {
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
    burst: AtomicU64,
    overflowing: AtomicBool,
}

impl Slot {
    /// Records a dropped event; true when it opens a new burst.
    fn note_drop(&self) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.burst.fetch_add(1, Ordering::Relaxed);
        !self.overflowing.swap(true, Ordering::Relaxed)
    }

    /// Closes an open burst, returning how many events it dropped.
    fn note_delivered(&self) -> Option<u64> {
        if self.overflowing.swap(false, Ordering::Relaxed) {
            Some(self.burst.swap(0, Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Per-subscriber queues and workers.
pub struct SubscriberSet {
    slots: Vec<Slot>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must run inside a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut slots = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
            workers.push(tokio::spawn(drive(Arc::clone(&sub), rx, bus.clone())));
            slots.push(Slot {
                sub,
                tx,
                dropped: AtomicU64::new(0),
                burst: AtomicU64::new(0),
                overflowing: AtomicBool::new(false),
            });
        }
        Self {
            slots,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber that accepts its kind. Never waits.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());

        for slot in &self.slots {
            if !slot.sub.accepts(event.kind) {
                continue;
            }
            match slot.tx.try_send(Arc::clone(&shared)) {
                Ok(()) => {
                    if let Some(dropped) = slot.note_delivered() {
                        tracing::info!(subscriber = slot.sub.name(), dropped, "subscriber caught up");
                    }
                }
                Err(err) => {
                    let reason = match err {
                        mpsc::error::TrySendError::Full(_) => "full",
                        mpsc::error::TrySendError::Closed(_) => "closed",
                    };
                    // Overflow reports about overflow reports would never end.
                    if slot.note_drop() && event.kind != EventKind::SubscriberOverflow {
                        tracing::warn!(
                            subscriber = slot.sub.name(),
                            reason,
                            kind = ?event.kind,
                            generation = event.generation,
                            "subscriber dropping events"
                        );
                        self.bus.publish(Event::subscriber_overflow(
                            slot.sub.name(),
                            reason,
                            event.generation,
                        ));
                    }
                }
            }
        }
    }

    /// Total events dropped for subscriber `name` since creation.
    pub fn dropped(&self, name: &str) -> u64 {
        self.slots
            .iter()
            .filter(|s| s.sub.name() == name)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Closes every queue and waits until the workers drained them.
    pub async fn shutdown(self) {
        drop(self.slots);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

async fn drive(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        if let Err(payload) = handled {
            let info = payload
                .downcast_ref::<&'static str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(subscriber = sub.name(), %info, generation = ev.generation, "subscriber panicked");
            bus.publish(Event::subscriber_panicked(sub.name(), info, ev.generation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Semaphore;

    struct Recorder(Arc<Mutex<Vec<EventKind>>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, ev: &Event) {
            if ev.kind == EventKind::Connected {
                panic!("boom");
            }
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    /// Blocks on every event until the test hands out permits.
    struct Stalled(Arc<Semaphore>);

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _ev: &Event) {
            if let Ok(permit) = self.0.acquire().await {
                permit.forget();
            }
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
        fn accepts(&self, kind: EventKind) -> bool {
            kind == EventKind::GenerationReady
        }
    }

    #[tokio::test]
    async fn panic_is_reported_and_others_keep_receiving() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = SubscriberSet::new(
            vec![Arc::new(Panicker), Arc::new(Recorder(Arc::clone(&seen)))],
            bus.clone(),
        );
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::Connected).with_generation(3));
        set.emit(&Event::new(EventKind::GenerationReady));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.initializer.as_deref(), Some("panicker"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
        assert_eq!(ev.generation, Some(3));

        set.shutdown().await;
        assert_eq!(
            *seen.lock(),
            vec![EventKind::Connected, EventKind::GenerationReady]
        );
    }

    #[tokio::test]
    async fn overflow_is_reported_once_per_burst() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let gate = Arc::new(Semaphore::new(0));
        let set = SubscriberSet::new(vec![Arc::new(Stalled(Arc::clone(&gate)))], bus.clone());

        // Filtered kinds never occupy the queue.
        for _ in 0..10 {
            set.emit(&Event::new(EventKind::ConnectAttempt));
        }
        assert_eq!(set.dropped("stalled"), 0);

        // One in the worker, one queued, the rest dropped.
        for generation in 1..=6 {
            set.emit(&Event::new(EventKind::GenerationReady).with_generation(generation));
            tokio::task::yield_now().await;
        }
        assert!(set.dropped("stalled") >= 3);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.initializer.as_deref(), Some("stalled"));
        assert!(ev.generation.is_some());
        assert!(rx.try_recv().is_err());

        gate.add_permits(100);
        set.shutdown().await;
    }
}
