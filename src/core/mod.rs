//! Runtime core: connection supervision and lifecycle.
//!
//! The public API from this module is [`Supervisor`] (with its builder and
//! configuration) and the [`ServiceHandle`] returned by `Supervisor::init`.
//!
//! Internal modules:
//! - [`connector`]: dials the broker with bounded, fixed-delay retries;
//! - [`generation`]: one connection lifetime: fan-out, join, teardown;
//! - [`supervisor`]: the reconnect loop, `init`, `work`, signal handling;
//! - [`init`]: readiness latch and service handle;
//! - [`shutdown`]: cross-platform shutdown signal handling.
//!
//! ```text
//! Supervisor::run ──► Connector::connect ──► Generation::run ──┐
//!        ▲                                                     │
//!        └──────────────── reconnect (unless ctx cancelled) ◄──┘
//! ```

mod builder;
mod config;
mod connector;
mod generation;
mod init;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{ConnectorConfig, SupervisorConfig};
pub use connector::Connector;
pub use init::ServiceHandle;
pub use supervisor::Supervisor;
