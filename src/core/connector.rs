//! # Connector: bounded dial retries.
//!
//! Opens a transport [`Connection`] with a fixed number of attempts and a fixed
//! pause between them. The first success is returned immediately.
//!
//! ## Event flow
//! ```text
//! attempt 1..=max_attempts:
//!   ├─► publish ConnectAttempt{ addr, attempt }
//!   ├─► dialer.dial(addr)          (cancellable)
//!   │     ├─ Ok  ──► return connection
//!   │     └─ Err ──► publish ConnectFailed{ attempt, reason, delay? }
//!   └─► sleep(delay)               (cancellable, skipped after the last attempt)
//!
//! exhausted ──► publish ConnectExhausted ──► Err(ConnectError::Exhausted)
//! ctx cancelled at any await ──► Err(ConnectError::Canceled)
//! ```
//!
//! ## Rules
//! - No backoff, no jitter: delays are deterministic
//! - The last dial error is kept as the source of `Exhausted`

use std::sync::Arc;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{Connection, Dialer},
    core::ConnectorConfig,
    error::{BrokerError, ConnectError},
    events::{Bus, Event, EventKind},
};

/// Dials a broker address with bounded retries.
pub struct Connector {
    dialer: Arc<dyn Dialer>,
    cfg: ConnectorConfig,
    bus: Bus,
}

impl Connector {
    /// Creates a connector; `cfg` is fixed for the connector's lifetime.
    pub fn new(dialer: Arc<dyn Dialer>, cfg: ConnectorConfig, bus: Bus) -> Self {
        Self { dialer, cfg, bus }
    }

    /// Dials `addr` until it succeeds, attempts run out, or `ctx` is cancelled.
    pub async fn connect(
        &self,
        addr: &str,
        ctx: &CancellationToken,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let attempts = self.cfg.attempts_clamped();
        let mut last: Option<BrokerError> = None;

        for attempt in 1..=attempts {
            if ctx.is_cancelled() {
                return Err(ConnectError::Canceled);
            }
            self.bus.publish(
                Event::new(EventKind::ConnectAttempt)
                    .with_addr(addr)
                    .with_attempt(attempt),
            );

            let res = select! {
                res = self.dialer.dial(addr) => res,
                _ = ctx.cancelled() => return Err(ConnectError::Canceled),
            };
            let err = match res {
                Ok(conn) => return Ok(conn),
                Err(e) => e,
            };

            let mut ev = Event::new(EventKind::ConnectFailed)
                .with_addr(addr)
                .with_attempt(attempt)
                .with_reason(err.to_string());
            last = Some(err);

            if attempt == attempts {
                self.bus.publish(ev);
                break;
            }
            ev = ev.with_delay(self.cfg.delay);
            self.bus.publish(ev);

            let sleep = time::sleep(self.cfg.delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = ctx.cancelled() => return Err(ConnectError::Canceled),
            }
        }

        let source = last.unwrap_or_else(|| BrokerError::Dial {
            reason: "no attempt made".into(),
        });
        self.bus.publish(
            Event::new(EventKind::ConnectExhausted)
                .with_addr(addr)
                .with_attempt(attempts)
                .with_reason(source.to_string()),
        );
        Err(ConnectError::Exhausted {
            addr: addr.to_string(),
            attempts,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::memory::MemoryBroker;

    fn connector(broker: &MemoryBroker, max_attempts: u32) -> (Connector, Bus) {
        let bus = Bus::new(64);
        let cfg = ConnectorConfig {
            max_attempts,
            delay: Duration::from_secs(2),
        };
        (
            Connector::new(Arc::new(broker.clone()), cfg, bus.clone()),
            bus,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let broker = MemoryBroker::new();
        broker.fail_next_dials(2);
        let (connector, bus) = connector(&broker, 5);
        let mut rx = bus.subscribe();

        let started = time::Instant::now();
        let conn = connector
            .connect("memory://a", &CancellationToken::new())
            .await;
        assert!(conn.is_ok());
        assert_eq!(broker.dial_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));

        let mut failed = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::ConnectFailed {
                failed += 1;
                assert_eq!(ev.delay_ms, Some(2000));
            }
        }
        assert_eq!(failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_without_trailing_sleep() {
        let broker = MemoryBroker::new();
        broker.fail_next_dials(u32::MAX);
        let (connector, _bus) = connector(&broker, 3);

        let started = time::Instant::now();
        let err = match connector.connect("memory://a", &CancellationToken::new()).await {
            Err(e) => e,
            Ok(_) => panic!("dial must fail"),
        };
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(broker.dial_count(), 3);
        match err {
            ConnectError::Exhausted { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.as_label(), "broker_dial");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_pause() {
        let broker = MemoryBroker::new();
        broker.fail_next_dials(u32::MAX);
        let (connector, _bus) = connector(&broker, 5);
        let ctx = CancellationToken::new();

        let cancel = ctx.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let res = connector.connect("memory://a", &ctx).await;
        assert!(matches!(res, Err(ConnectError::Canceled)));
        assert_eq!(broker.dial_count(), 1);
    }
}
