//! # Initializers: per-generation units of setup and work.
//!
//! This module provides the initializer-related types:
//! - [`Initializer`] - trait for per-connection setup (declare topology, start consumers)
//! - [`InitFn`] - closure-backed initializer
//! - [`InitializerRef`] - shared reference to an initializer (`Arc<dyn Initializer>`)
//! - [`Scope`] - generation-scoped handle used to spawn long-running workers

mod init_fn;
mod initializer;
mod scope;

pub use init_fn::InitFn;
pub use initializer::{Initializer, InitializerRef};
pub use scope::{Scope, WorkerFuture};

pub(crate) use scope::Spawned;
