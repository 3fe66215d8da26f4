//! # Runtime events emitted by the connector and the supervisor loop.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Connect events**: dialing the broker (attempt, failed, exhausted, connected)
//! - **Generation events**: one connection lifetime (ready, lost, stopped, reconnecting)
//! - **Initializer events**: per-initializer setup and worker outcomes
//! - **Shutdown/subscriber events**: planned shutdown, grace, subscriber faults
//!
//! The [`Event`] struct carries additional metadata such as the broker address,
//! generation number, initializer name, reasons and retry delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use rabbitvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ConnectFailed)
//!     .with_addr("amqp://localhost:5672")
//!     .with_reason("connection refused")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(2));
//!
//! assert_eq!(ev.kind, EventKind::ConnectFailed);
//! assert_eq!(ev.addr.as_deref(), Some("amqp://localhost:5672"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `initializer`: subscriber name
    /// - `reason`: panic info/message
    /// - `generation`: generation of the event being handled, if any
    SubscriberPanicked,

    /// A subscriber started dropping events (queue full or worker closed).
    ///
    /// Published once per burst of drops.
    ///
    /// Sets:
    /// - `initializer`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    /// - `generation`: generation of the first dropped event, if any
    SubscriberOverflow,

    // === Connect events ===
    /// A dial attempt is starting.
    ///
    /// Sets:
    /// - `addr`: broker address
    /// - `attempt`: attempt number (1-based)
    ConnectAttempt,

    /// A dial attempt failed.
    ///
    /// Sets:
    /// - `addr`, `attempt`
    /// - `reason`: dial error
    /// - `delay_ms`: wait before the next attempt (absent after the last one)
    ConnectFailed,

    /// Every dial attempt failed; the supervisor loop returns an error.
    ///
    /// Sets:
    /// - `addr`, `attempt` (attempts made), `reason` (last error)
    ConnectExhausted,

    /// A connection was established and a new generation starts.
    ///
    /// Sets:
    /// - `addr`, `generation`
    Connected,

    // === Initializer events ===
    /// A channel could not be allocated for an initializer.
    ///
    /// Sets:
    /// - `generation`, `initializer`, `reason`
    ChannelFailed,

    /// An initializer completed its setup.
    ///
    /// Sets:
    /// - `generation`, `initializer`
    InitializerReady,

    /// An initializer returned an error.
    ///
    /// Sets:
    /// - `generation`, `initializer`, `reason`
    InitializerFailed,

    /// A background worker spawned by an initializer finished.
    ///
    /// Sets:
    /// - `generation`, `initializer`
    /// - `reason`: worker error, if any
    WorkerStopped,

    // === Generation events ===
    /// Every initializer of the generation completed setup.
    ///
    /// Sets:
    /// - `addr`, `generation`
    GenerationReady,

    /// The broker closed the connection unexpectedly.
    ///
    /// Sets:
    /// - `addr`, `generation`, `reason`
    ConnectionLost,

    /// The generation was torn down: channels and connection closed, tasks joined.
    ///
    /// Sets:
    /// - `addr`, `generation`
    /// - `reason`: what ended it (absent on planned shutdown)
    GenerationStopped,

    /// The supervisor will dial again after a torn-down generation.
    ///
    /// Sets:
    /// - `addr`, `generation` (the generation that ended)
    /// - `delay_ms`: pause before the next dial
    Reconnecting,

    // === Shutdown events ===
    /// Shutdown requested (outer context cancelled or OS signal observed).
    ShutdownRequested,

    /// Grace period exceeded; some generation tasks did not stop in time and were aborted.
    ///
    /// Sets:
    /// - `generation`
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,

    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Broker address, if applicable.
    pub addr: Option<Arc<str>>,
    /// Connection generation (starting from 1).
    pub generation: Option<u64>,
    /// Initializer (or subscriber) name, if applicable.
    pub initializer: Option<Arc<str>>,
    /// Event classification.
    pub kind: EventKind,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            at: SystemTime::now(),
            attempt: None,
            reason: None,
            delay_ms: None,
            addr: None,
            generation: None,
            initializer: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an initializer name.
    #[inline]
    pub fn with_initializer(mut self, name: impl Into<Arc<str>>) -> Self {
        self.initializer = Some(name.into());
        self
    }

    /// Attaches a broker address.
    #[inline]
    pub fn with_addr(mut self, addr: impl Into<Arc<str>>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Attaches a generation number.
    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Creates a subscriber overflow event for a drop of an event from `generation`.
    pub fn subscriber_overflow(
        subscriber: &'static str,
        reason: &'static str,
        generation: Option<u64>,
    ) -> Self {
        let ev = Event::new(EventKind::SubscriberOverflow)
            .with_initializer(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"));
        match generation {
            Some(g) => ev.with_generation(g),
            None => ev,
        }
    }

    /// Creates a subscriber panic event raised while handling an event from `generation`.
    pub fn subscriber_panicked(subscriber: &'static str, info: String, generation: Option<u64>) -> Self {
        let ev = Event::new(EventKind::SubscriberPanicked)
            .with_initializer(subscriber)
            .with_reason(info);
        match generation {
            Some(g) => ev.with_generation(g),
            None => ev,
        }
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
