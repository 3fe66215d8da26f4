//! # LogWriter: events as `tracing` records
//!
//! Forwards every [`Event`] to the `tracing` facade. Routine progress is logged
//! at `info`/`debug`, recoverable faults at `warn`, and terminal failures at `error`.
//! Install any `tracing` subscriber (e.g. `tracing-subscriber`'s `fmt`) to see them.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  rabbitvisor: connected addr="amqp://localhost:5672" generation=1
//! WARN  rabbitvisor: connect attempt failed addr="amqp://localhost:5672" attempt=1 delay_ms=2000 reason="connection refused"
//! WARN  rabbitvisor: connection lost generation=1 reason="connection closed: node down"
//! INFO  rabbitvisor: reconnecting addr="amqp://localhost:5672" after_generation=1
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let addr = e.addr.as_deref().unwrap_or("");
        let init = e.initializer.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");
        let generation = e.generation.unwrap_or(0);

        match e.kind {
            EventKind::ConnectAttempt => {
                tracing::debug!(target: "rabbitvisor", addr, attempt = e.attempt, "dialing broker");
            }
            EventKind::ConnectFailed => {
                tracing::warn!(
                    target: "rabbitvisor",
                    addr, attempt = e.attempt, delay_ms = e.delay_ms, reason,
                    "connect attempt failed"
                );
            }
            EventKind::ConnectExhausted => {
                tracing::error!(target: "rabbitvisor", addr, attempts = e.attempt, reason, "giving up on broker");
            }
            EventKind::Connected => {
                tracing::info!(target: "rabbitvisor", addr, generation, "connected");
            }
            EventKind::ChannelFailed => {
                tracing::warn!(target: "rabbitvisor", generation, initializer = init, reason, "channel allocation failed");
            }
            EventKind::InitializerReady => {
                tracing::debug!(target: "rabbitvisor", generation, initializer = init, "initializer ready");
            }
            EventKind::InitializerFailed => {
                tracing::warn!(target: "rabbitvisor", generation, initializer = init, reason, "initializer failed");
            }
            EventKind::WorkerStopped => {
                tracing::warn!(target: "rabbitvisor", generation, initializer = init, reason, "worker stopped");
            }
            EventKind::GenerationReady => {
                tracing::info!(target: "rabbitvisor", addr, generation, "all initializers ready");
            }
            EventKind::ConnectionLost => {
                tracing::warn!(target: "rabbitvisor", addr, generation, reason, "connection lost");
            }
            EventKind::GenerationStopped => {
                tracing::debug!(target: "rabbitvisor", addr, generation, reason, "generation stopped");
            }
            EventKind::Reconnecting => {
                tracing::info!(target: "rabbitvisor", addr, after_generation = generation, delay_ms = e.delay_ms, "reconnecting");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "rabbitvisor", "shutdown requested");
            }
            EventKind::GraceExceeded => {
                tracing::warn!(target: "rabbitvisor", generation, "grace exceeded, aborting generation tasks");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "rabbitvisor", subscriber = init, generation, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "rabbitvisor", subscriber = init, generation, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
