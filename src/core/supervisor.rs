//! # Supervisor: the reconnect loop.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the [`Connector`]
//! and the runtime configuration. Each iteration of its loop is one
//! [`Generation`]: connect, run every initializer on its own channel, wait for
//! the first terminal event, tear everything down, and reconnect unless the
//! shutdown was planned.
//!
//! ## High-level architecture
//! ```text
//! run(ctx, addr, initializers):
//!
//! loop {
//!   ├─► Connector::connect(addr, ctx)
//!   │       ├─ Exhausted ─► return Err(ServiceError::Connect)   (no initializer ran)
//!   │       └─ Canceled  ─► return Ok                           (planned shutdown)
//!   ├─► generation += 1, publish Connected
//!   ├─► Generation::run(initializers)   (fan-out, join, teardown)
//!   ├─► ctx cancelled?  ─► publish ShutdownRequested, return Ok
//!   └─► publish Reconnecting, sleep connector delay, continue
//! }
//!
//! Event flow:
//!   Connector / Generation ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet::emit
//! ```
//!
//! ## Rules
//! - Generation N+1 starts only after generation N is fully torn down
//! - Faults inside a generation are never returned; they cause a reconnect
//!   after the connector delay, so a topology that always fails cannot spin
//! - A planned shutdown is never an error
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use rabbitvisor::{Consumer, Delivery, HandlerFn, PublishOptions, Publisher, Publishing, Queue, Supervisor};
//!
//! # #[cfg(not(feature = "memory"))]
//! # fn main() {}
//! # #[cfg(feature = "memory")]
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     use rabbitvisor::broker::memory::MemoryBroker;
//!
//!     let broker = MemoryBroker::new();
//!     let sup = Supervisor::builder(broker).build();
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let queue = Queue::new("jobs");
//!     let consumer = Consumer::new(
//!         queue.clone(),
//!         HandlerFn::arc(move |d: Delivery| {
//!             let tx = tx.clone();
//!             async move { let _ = tx.send(d.body); }
//!         }),
//!         Default::default(),
//!     );
//!     let (publisher, publisher_init) = Publisher::new("jobs-publisher", PublishOptions::default());
//!
//!     let handle = sup
//!         .init(CancellationToken::new(), "memory://local", vec![consumer, publisher_init])
//!         .await?;
//!
//!     publisher.publish("", "jobs", Publishing::new("hello")).await?;
//!     assert_eq!(rx.recv().await.as_deref(), Some(&b"hello"[..]));
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::Dialer,
    core::{
        builder::SupervisorBuilder,
        config::SupervisorConfig,
        connector::Connector,
        generation::Generation,
        init::{ReadyLatch, ServiceHandle},
        shutdown,
    },
    consumer::{Consumer, DeliveryHandler},
    error::{ConnectError, InitError, ServiceError},
    events::{Bus, Event, EventKind},
    initializers::InitializerRef,
    publisher::{PublishOptions, Publisher},
    subscribers::SubscriberSet,
    topology::Queue,
};

/// Supervises broker connections and replays initializers on every reconnect.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    connector: Connector,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        dialer: Arc<dyn Dialer>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
    ) -> Self {
        let connector = Connector::new(dialer, cfg.connector.clone(), bus.clone());
        Self {
            cfg,
            bus,
            subs,
            connector,
        }
    }

    /// Starts building a supervisor that dials through `dialer`.
    pub fn builder<D: Dialer>(dialer: D) -> SupervisorBuilder {
        SupervisorBuilder::new(Arc::new(dialer))
    }

    /// Returns the event bus (subscribe to observe the supervisor directly).
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns the configuration the supervisor was built with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Runs the reconnect loop until `ctx` is cancelled or dialing is exhausted.
    ///
    /// Returns `Ok(())` on planned shutdown and [`ServiceError::Connect`] when the
    /// connector gives up. Every other failure causes a reconnect.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        addr: &str,
        initializers: Vec<InitializerRef>,
    ) -> Result<(), ServiceError> {
        self.run_loop(&ctx, Arc::from(addr), &initializers, None)
            .await
    }

    /// Runs the loop in the background and waits until the first generation is ready.
    ///
    /// Returns once every initializer completed its first setup. If the first
    /// generation fails before that, the loop is stopped and the failure returned.
    /// Later reconnects happen in the background; use the returned
    /// [`ServiceHandle`] to stop the loop or wait for it.
    pub async fn init(
        self: &Arc<Self>,
        ctx: CancellationToken,
        addr: impl Into<String>,
        initializers: Vec<InitializerRef>,
    ) -> Result<ServiceHandle, InitError> {
        let token = ctx.child_token();
        let addr: Arc<str> = Arc::from(addr.into());
        let (latch, ready) = ReadyLatch::new();

        let sup = Arc::clone(self);
        let loop_token = token.clone();
        let join = tokio::spawn(async move {
            sup.run_loop(&loop_token, addr, &initializers, Some(&latch))
                .await
        });

        match ready.await {
            Ok(Ok(())) => Ok(ServiceHandle::new(token, join)),
            Ok(Err(e)) => {
                token.cancel();
                let _ = join.await;
                Err(e)
            }
            Err(_) => match join.await {
                Ok(Ok(())) => Err(InitError::Canceled),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(InitError::Panicked {
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Registers a consumer on `queue` and a publisher replying to it, then runs [`init`](Self::init).
    ///
    /// The publisher's reply-to defaults to the queue's current effective name, so
    /// it follows server-generated names across reconnects.
    pub async fn work(
        self: &Arc<Self>,
        ctx: CancellationToken,
        addr: impl Into<String>,
        queue: Queue,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(Publisher, ServiceHandle), InitError> {
        let consumer = Consumer::new(queue.clone(), handler, Default::default());
        let (publisher, publisher_init) = Publisher::new(
            format!("{}-publisher", queue.requested_name()),
            PublishOptions::default().reply_to_queue(queue),
        );
        let handle = self
            .init(ctx, addr, vec![consumer, publisher_init])
            .await?;
        Ok((publisher, handle))
    }

    /// Runs the loop until SIGINT/SIGTERM/SIGQUIT (Ctrl-C on other platforms).
    ///
    /// The signal is a planned shutdown: the current generation is torn down and
    /// `Ok(())` returned.
    pub async fn run_until_signal(
        &self,
        addr: &str,
        initializers: Vec<InitializerRef>,
    ) -> Result<(), ServiceError> {
        let ctx = CancellationToken::new();
        let run = self.run(ctx.clone(), addr, initializers);
        tokio::pin!(run);

        select! {
            res = &mut run => res,
            signal = shutdown::termination() => {
                match signal {
                    Ok(name) => {
                        tracing::info!(signal = name, addr, "termination signal, stopping supervisor");
                        ctx.cancel();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "signal handlers unavailable, running until the loop ends");
                    }
                }
                run.await
            }
        }
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn run_loop(
        &self,
        ctx: &CancellationToken,
        addr: Arc<str>,
        initializers: &[InitializerRef],
        latch: Option<&ReadyLatch>,
    ) -> Result<(), ServiceError> {
        let mut generation: u64 = 0;

        loop {
            let conn = match self.connector.connect(&addr, ctx).await {
                Ok(conn) => conn,
                Err(ConnectError::Canceled) => {
                    self.bus.publish(Event::new(EventKind::ShutdownRequested));
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            generation += 1;
            self.bus.publish(
                Event::new(EventKind::Connected)
                    .with_addr(Arc::clone(&addr))
                    .with_generation(generation),
            );

            let res = Generation::new(
                generation,
                Arc::clone(&addr),
                conn,
                ctx,
                self.bus.clone(),
                self.cfg.grace,
            )
            .run(initializers, latch)
            .await;

            if ctx.is_cancelled() {
                self.bus.publish(Event::new(EventKind::ShutdownRequested));
                return Ok(());
            }
            if let (Err(e), Some(latch)) = (res, latch) {
                if !latch.is_fired() {
                    latch.fire(Err(e.into()));
                    return Ok(());
                }
            }

            let delay = self.cfg.connector.delay;
            self.bus.publish(
                Event::new(EventKind::Reconnecting)
                    .with_addr(Arc::clone(&addr))
                    .with_generation(generation)
                    .with_delay(delay),
            );
            select! {
                _ = time::sleep(delay) => {}
                _ = ctx.cancelled() => {
                    self.bus.publish(Event::new(EventKind::ShutdownRequested));
                    return Ok(());
                }
            }
        }
    }
}
