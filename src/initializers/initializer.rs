//! # Initializer abstraction.
//!
//! An [`Initializer`] is instantiated once by the caller and invoked fresh on
//! every connection generation with a brand-new [`Channel`](crate::broker::Channel).
//!
//! ## Outcome
//! - `Ok(())`: setup finished. Counts toward generation readiness and does **not**
//!   end the generation.
//! - `Err(_)`: setup failed. The generation is torn down and the supervisor reconnects.
//!
//! Long-running work (a delivery loop, a heartbeat) is started with
//! [`Scope::spawn`]. Its completion, with or without an error, ends the generation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::ChannelRef;
use crate::error::InitializerError;

use super::Scope;

/// # Per-connection setup unit.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use rabbitvisor::broker::{ChannelRef, FieldTable, QueueFlags};
/// use rabbitvisor::{Initializer, InitializerError, Scope};
///
/// struct DeclareAudit;
///
/// #[async_trait]
/// impl Initializer for DeclareAudit {
///     fn name(&self) -> &str { "declare-audit" }
///
///     async fn init(&self, channel: ChannelRef, _scope: Scope) -> Result<(), InitializerError> {
///         channel
///             .queue_declare("audit", QueueFlags { durable: true, ..Default::default() }, &FieldTable::new())
///             .await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Initializer: Send + Sync + 'static {
    /// Returns a stable, human-readable name (used in events and errors).
    fn name(&self) -> &str;

    /// Runs setup on a channel that belongs to the current generation only.
    ///
    /// The channel must not be stored beyond the generation; `scope` tells when it ends.
    async fn init(&self, channel: ChannelRef, scope: Scope) -> Result<(), InitializerError>;
}

/// Shared handle to an initializer.
pub type InitializerRef = Arc<dyn Initializer>;
