//! # Generation: one connection lifetime.
//!
//! A [`Generation`] owns one [`Connection`] and everything spawned on it. It is
//! created after a successful dial and consumed by [`Generation::run`], which
//! returns only once every task of the generation has stopped and the
//! connection is closed.
//!
//! ## Task group
//! ```text
//! JoinSet<TaskOutcome>
//!   ├─ watcher         select { conn.closed(), token.cancelled() }
//!   ├─ init #1         open_channel() ─► Initializer::init(channel, scope)
//!   ├─ init #N         open_channel() ─► Initializer::init(channel, scope)
//!   └─ workers         admitted from Scope::spawn while the generation is live
//! ```
//!
//! ## Join loop
//! ```text
//! loop:
//!   ├─ Scope::spawn received  ─► set.spawn(worker)
//!   └─ task finished:
//!        ├─ Ready (init Ok)   ─► publish InitializerReady
//!        │                       all ready? ─► publish GenerationReady, fire latch
//!        ├─ Cancelled         ─► planned shutdown, stop
//!        └─ anything else     ─► fault, stop
//!
//! teardown:
//!   token.cancel() ─► refuse new workers
//!   ─► within grace: close channels, close connection, join tasks
//!   ─► (GraceExceeded + abort_all) ─► publish GenerationStopped
//! ```
//!
//! ## Rules
//! - The first terminal completion decides the outcome; later ones are ignored
//! - A worker finishing with `Ok` is still terminal
//! - Workers arriving after teardown began are dropped unpolled
//! - Nothing spawned by this generation outlives [`Generation::run`]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::{select, sync::mpsc, task::JoinSet, time};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{ChannelRef, Connection},
    core::init::ReadyLatch,
    error::{BrokerError, GenerationError, InitializerError},
    events::{Bus, Event, EventKind},
    initializers::{InitializerRef, Scope, Spawned},
};

/// What one generation task reports when it finishes.
enum TaskOutcome {
    /// The generation token was cancelled before the task finished.
    Cancelled,
    /// The broker closed the connection.
    Closed(BrokerError),
    /// An initializer finished setup.
    Ready(Arc<str>),
    ChannelFailed(Arc<str>, BrokerError),
    InitFailed(Arc<str>, InitializerError),
    WorkerStopped(Arc<str>, Result<(), InitializerError>),
}

/// One connection lifetime and its task group.
pub(crate) struct Generation {
    number: u64,
    addr: Arc<str>,
    conn: Arc<dyn Connection>,
    token: CancellationToken,
    bus: Bus,
    grace: Duration,
    channels: Arc<Mutex<Vec<ChannelRef>>>,
}

impl Generation {
    /// Creates generation `number` on `conn`; its token is a child of `ctx`.
    pub(crate) fn new(
        number: u64,
        addr: Arc<str>,
        conn: Box<dyn Connection>,
        ctx: &CancellationToken,
        bus: Bus,
        grace: Duration,
    ) -> Self {
        Self {
            number,
            addr,
            conn: Arc::from(conn),
            token: ctx.child_token(),
            bus,
            grace,
            channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs every initializer on its own channel and supervises the result.
    ///
    /// Returns `Ok(())` when the generation ended because the outer context was
    /// cancelled, or the fault that ended it otherwise. `latch` is fired with
    /// `Ok` once every initializer completed setup.
    pub(crate) async fn run(
        self,
        inits: &[InitializerRef],
        latch: Option<&ReadyLatch>,
    ) -> Result<(), GenerationError> {
        let (spawn_tx, mut spawn_rx) = mpsc::unbounded_channel::<Spawned>();
        let mut set: JoinSet<TaskOutcome> = JoinSet::new();

        self.spawn_watcher(&mut set);
        for init in inits {
            self.spawn_initializer(&mut set, Arc::clone(init), spawn_tx.clone());
        }
        drop(spawn_tx);

        let mut pending = inits.len();
        if pending == 0 {
            self.mark_ready(latch);
        }

        let outcome = loop {
            select! {
                Some(spawned) = spawn_rx.recv() => {
                    set.spawn(run_worker(spawned));
                }
                joined = set.join_next() => {
                    let Some(joined) = joined else {
                        break Ok(());
                    };
                    match self.classify(joined) {
                        Some(end) => break end,
                        None => {
                            pending = pending.saturating_sub(1);
                            if pending == 0 {
                                self.mark_ready(latch);
                            }
                        }
                    }
                }
            }
        };

        spawn_rx.close();
        while spawn_rx.try_recv().is_ok() {}
        self.teardown(&mut set, &outcome).await;
        outcome
    }

    /// Maps a finished task to the generation outcome; `None` means "initializer ready".
    fn classify(
        &self,
        joined: Result<TaskOutcome, tokio::task::JoinError>,
    ) -> Option<Result<(), GenerationError>> {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                return Some(Err(GenerationError::TaskPanicked {
                    reason: e.to_string(),
                }));
            }
        };

        match outcome {
            TaskOutcome::Ready(name) => {
                self.publish(EventKind::InitializerReady, |ev| ev.with_initializer(name));
                None
            }
            TaskOutcome::Cancelled => Some(Ok(())),
            TaskOutcome::Closed(source) => {
                self.publish(EventKind::ConnectionLost, |ev| {
                    ev.with_addr(Arc::clone(&self.addr))
                        .with_reason(source.to_string())
                });
                Some(Err(GenerationError::ConnectionClosed { source }))
            }
            TaskOutcome::ChannelFailed(name, source) => {
                self.publish(EventKind::ChannelFailed, |ev| {
                    ev.with_initializer(Arc::clone(&name))
                        .with_reason(source.to_string())
                });
                Some(Err(GenerationError::ChannelAllocation {
                    initializer: name.to_string(),
                    source,
                }))
            }
            TaskOutcome::InitFailed(name, source) => {
                self.publish(EventKind::InitializerFailed, |ev| {
                    ev.with_initializer(Arc::clone(&name))
                        .with_reason(source.to_string())
                });
                Some(Err(GenerationError::Initializer {
                    initializer: name.to_string(),
                    source,
                }))
            }
            TaskOutcome::WorkerStopped(name, res) => {
                let source = res.err();
                self.publish(EventKind::WorkerStopped, |ev| {
                    let ev = ev.with_initializer(Arc::clone(&name));
                    match &source {
                        Some(e) => ev.with_reason(e.to_string()),
                        None => ev,
                    }
                });
                Some(Err(GenerationError::WorkerStopped {
                    initializer: name.to_string(),
                    source,
                }))
            }
        }
    }

    fn spawn_watcher(&self, set: &mut JoinSet<TaskOutcome>) {
        let conn = Arc::clone(&self.conn);
        let token = self.token.clone();
        set.spawn(async move {
            select! {
                reason = conn.closed() => TaskOutcome::Closed(reason),
                _ = token.cancelled() => TaskOutcome::Cancelled,
            }
        });
    }

    fn spawn_initializer(
        &self,
        set: &mut JoinSet<TaskOutcome>,
        init: InitializerRef,
        spawner: mpsc::UnboundedSender<Spawned>,
    ) {
        let conn = Arc::clone(&self.conn);
        let token = self.token.clone();
        let channels = Arc::clone(&self.channels);
        let number = self.number;

        set.spawn(async move {
            let name: Arc<str> = Arc::from(init.name());
            let setup = async {
                let channel = match conn.open_channel().await {
                    Ok(ch) => ch,
                    Err(e) => return TaskOutcome::ChannelFailed(Arc::clone(&name), e),
                };
                channels.lock().push(Arc::clone(&channel));

                let scope = Scope::new(Arc::clone(&name), number, token.clone(), spawner);
                match init.init(channel, scope).await {
                    Ok(()) => TaskOutcome::Ready(Arc::clone(&name)),
                    Err(e) => TaskOutcome::InitFailed(Arc::clone(&name), e),
                }
            };
            select! {
                outcome = setup => outcome,
                _ = token.cancelled() => TaskOutcome::Cancelled,
            }
        });
    }

    fn mark_ready(&self, latch: Option<&ReadyLatch>) {
        self.publish(EventKind::GenerationReady, |ev| {
            ev.with_addr(Arc::clone(&self.addr))
        });
        if let Some(latch) = latch {
            latch.fire(Ok(()));
        }
    }

    /// Cancels the generation, closes its channels and connection, and joins its tasks.
    async fn teardown(
        &self,
        set: &mut JoinSet<TaskOutcome>,
        outcome: &Result<(), GenerationError>,
    ) {
        self.token.cancel();

        let channels: Vec<ChannelRef> = std::mem::take(&mut *self.channels.lock());
        let conn = Arc::clone(&self.conn);
        let drain = async {
            for channel in channels {
                let _ = channel.close().await;
            }
            let _ = conn.close().await;
            while set.join_next().await.is_some() {}
        };
        // Broker closes count against the same grace as the task join.
        if time::timeout(self.grace, drain).await.is_err() {
            self.publish(EventKind::GraceExceeded, |ev| ev);
            set.abort_all();
            while set.join_next().await.is_some() {}
        }

        self.publish(EventKind::GenerationStopped, |ev| {
            let ev = ev.with_addr(Arc::clone(&self.addr));
            match outcome {
                Ok(()) => ev,
                Err(e) => ev.with_reason(e.to_string()),
            }
        });
    }

    fn publish(&self, kind: EventKind, f: impl FnOnce(Event) -> Event) {
        self.bus
            .publish(f(Event::new(kind).with_generation(self.number)));
    }
}

async fn run_worker(spawned: Spawned) -> TaskOutcome {
    let res = spawned.fut.await;
    TaskOutcome::WorkerStopped(spawned.initializer, res)
}
