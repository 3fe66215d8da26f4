//! # Function-backed initializer (`InitFn`)
//!
//! [`InitFn`] wraps a closure `F: Fn(ChannelRef, Scope) -> Fut`, producing a fresh
//! future per generation. Shared state across generations must be captured
//! explicitly (e.g. an `Arc<...>` cloned into the closure).
//!
//! ## Example
//! ```rust
//! use rabbitvisor::broker::{ChannelRef, ExchangeFlags, ExchangeKind, FieldTable};
//! use rabbitvisor::{InitFn, InitializerError, InitializerRef, Scope};
//!
//! let init: InitializerRef = InitFn::arc("exchanges", |ch: ChannelRef, _scope: Scope| async move {
//!     ch.exchange_declare("events", &ExchangeKind::Topic, ExchangeFlags::default(), false, &FieldTable::new())
//!         .await?;
//!     Ok::<_, InitializerError>(())
//! });
//!
//! assert_eq!(init.name(), "exchanges");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::ChannelRef;
use crate::error::InitializerError;

use super::{Initializer, Scope};

/// Function-backed initializer.
#[derive(Debug)]
pub struct InitFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> InitFn<F>
where
    F: Fn(ChannelRef, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), InitializerError>> + Send + 'static,
{
    /// Creates a new function-backed initializer.
    ///
    /// Prefer [`InitFn::arc`] when you immediately need an [`InitializerRef`](super::InitializerRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the initializer and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Initializer for InitFn<F>
where
    F: Fn(ChannelRef, Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), InitializerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, channel: ChannelRef, scope: Scope) -> Result<(), InitializerError> {
        (self.f)(channel, scope).await
    }
}
