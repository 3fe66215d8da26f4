//! # Topology descriptors.
//!
//! [`Queue`] and [`Exchange`] describe broker entities independently of any
//! connection. Initializers declare them on every generation's channel; the
//! descriptors themselves outlive reconnects.

mod exchange;
mod queue;

pub use exchange::Exchange;
pub use queue::Queue;
