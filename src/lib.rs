//! # rabbitvisor
//!
//! **Rabbitvisor** keeps a message-broker connection alive for you.
//!
//! It dials the broker, hands every registered initializer its own channel,
//! and when anything breaks (the connection, a channel, an initializer, a
//! consumer loop) it tears the whole connection generation down, dials again
//! and replays every initializer. Publisher and consumer handles built on top
//! stay valid across that cycle.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ Initializer  │   │   Consumer   │   │  Publisher   │
//!     │ (topology)   │   │ (initializer)│   │ (initializer)│
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (reconnect loop)                                      │
//! │  - Connector (bounded, fixed-delay dialing)                       │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬────────────────────────────────────────────────────┬───────┘
//!        ▼                                                    │
//! ┌───────────────────────────────────────────────────┐       │
//! │ Generation N (one connection)                     │       │
//! │  - watcher: resolves on unsolicited close         │       │
//! │  - one channel + init() per initializer           │       │
//! │  - workers attached through Scope::spawn          │       │
//! │  first terminal outcome ─► teardown ─► reconnect  │       │
//! └──────┬────────────────────────────────────────────┘       │
//!        │ Publishes                                          │
//!        │ Connected, InitializerReady, GenerationReady,      │
//!        │ ConnectionLost, GenerationStopped, Reconnecting... │
//!        ▼                                                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │              (capacity: SupervisorConfig::bus_capacity)           │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                      ┌────────────┼────────────┐
//!                      ▼            ▼            ▼
//!                  LogWriter     worker2      workerN
//! ```
//!
//! ### Lifecycle
//! ```text
//! loop {
//!   ├─► connect(addr)          (max_attempts, fixed delay, cancellable)
//!   │       ├─ Exhausted ─► return Err        (no initializer ran)
//!   │       └─ Canceled  ─► return Ok         (planned shutdown)
//!   ├─► generation += 1
//!   ├─► for each initializer: open_channel ─► init(channel, scope)
//!   │       every init Ok ─► GenerationReady (releases Supervisor::init once)
//!   ├─► wait for the first of:
//!   │       ctx cancelled | connection closed | init Err | worker finished
//!   ├─► teardown: cancel scope, close channels, close connection, join (grace)
//!   └─► ctx cancelled? return Ok : reconnect
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------|
//! | **Supervision**   | Reconnect loop, first-generation readiness, signal handling. | [`Supervisor`], [`ServiceHandle`]          |
//! | **Initializers**  | Per-generation setup with attached workers.                  | [`Initializer`], [`InitFn`], [`Scope`]     |
//! | **Publishing**    | Handle that survives reconnects, fails fast while down.      | [`Publisher`], [`PublishOptions`]          |
//! | **Consuming**     | Queue declare + delivery loop replayed on every generation.  | [`Consumer`], [`DeliveryHandler`]          |
//! | **Topology**      | Queue and exchange descriptors.                              | [`Queue`], [`Exchange`]                    |
//! | **Subscriber API**| Observe connection and generation events.                    | [`Subscribe`], [`LogWriter`]               |
//! | **Errors**        | Typed errors per layer.                                      | [`ServiceError`], [`InitError`], ...       |
//! | **Configuration** | Connector retries, teardown grace, bus capacity.             | [`SupervisorConfig`], [`ConnectorConfig`]  |
//!
//! ## Optional features
//! - `amqp`: `broker::amqp::AmqpDialer`, an adapter over the `lapin` client.
//! - `memory`: `broker::memory::MemoryBroker`, an in-process broker with fault
//!   injection. Integration tests and demos require it.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use rabbitvisor::{
//!     ConnectorConfig, Delivery, HandlerFn, LogWriter, Publishing, Queue, Subscribe, Supervisor,
//!     SupervisorConfig,
//! };
//!
//! # #[cfg(not(feature = "memory"))]
//! # fn main() {}
//! # #[cfg(feature = "memory")]
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     use rabbitvisor::broker::memory::MemoryBroker;
//!
//!     let cfg = SupervisorConfig {
//!         connector: ConnectorConfig { max_attempts: 3, ..Default::default() },
//!         ..Default::default()
//!     };
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
//!     let sup = Supervisor::builder(MemoryBroker::new())
//!         .with_config(cfg)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let handler = HandlerFn::arc(move |d: Delivery| {
//!         let tx = tx.clone();
//!         async move { let _ = tx.send(d.body); }
//!     });
//!
//!     let (publisher, handle) = sup
//!         .work(CancellationToken::new(), "memory://local", Queue::new("greetings"), handler)
//!         .await?;
//!     publisher.publish("", "greetings", Publishing::new("hi")).await?;
//!     assert_eq!(rx.recv().await.as_deref(), Some(&b"hi"[..]));
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```
pub mod broker;
mod consumer;
mod core;
mod error;
mod events;
mod initializers;
mod publisher;
mod subscribers;
mod topology;

// ---- Public re-exports ----

pub use broker::{Delivery, FieldTable, FieldValue, Properties, Publishing};
pub use consumer::{ConsumeOptions, Consumer, DeliveryHandler, HandlerFn};
pub use core::{
    Connector, ConnectorConfig, ServiceHandle, Supervisor, SupervisorBuilder, SupervisorConfig,
};
pub use error::{
    BrokerError, ConnectError, GenerationError, InitError, InitializerError, PublishError,
    ServiceError,
};
pub use events::{Bus, Event, EventKind};
pub use initializers::{InitFn, Initializer, InitializerRef, Scope, WorkerFuture};
pub use publisher::{PublishOptions, Publisher};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use topology::{Exchange, Queue};
