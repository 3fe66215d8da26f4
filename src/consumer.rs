//! # Reconnect-safe consumer.
//!
//! [`Consumer::new`] builds an initializer that, on every generation:
//! 1. declares the queue (the declaration died with the previous connection),
//! 2. applies the receive limits, if any,
//! 3. starts a consumer and spawns one delivery loop into the generation scope,
//! 4. returns `Ok(())` right away.
//!
//! The delivery loop calls the handler once per delivery, in arrival order. It
//! returns when the stream ends (the broker closed the channel) or when the
//! generation is cancelled; either way the generation is torn down and the
//! consumer is started again on the next connection.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    broker::{ChannelRef, ConsumeFlags, Delivery, FieldTable, FieldValue},
    error::InitializerError,
    initializers::{Initializer, InitializerRef, Scope},
    topology::Queue,
};

/// Handles one delivery.
///
/// Called sequentially for a single consumer; with manual acknowledgment the
/// handler is responsible for calling [`Delivery::ack`].
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery);
}

/// Closure-backed [`DeliveryHandler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps the closure and returns it as a shared handler.
    pub fn arc(f: F) -> Arc<dyn DeliveryHandler> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> DeliveryHandler for HandlerFn<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) {
        (self.f)(delivery).await;
    }
}

/// Consumer configuration.
#[derive(Clone, Debug, Default)]
pub struct ConsumeOptions {
    name: String,
    no_auto_ack: bool,
    exclusive: bool,
    no_local: bool,
    no_wait: bool,
    args: FieldTable,
    limit_count: u16,
    limit_size: u32,
}

impl ConsumeOptions {
    /// Consumer tag; empty lets the broker pick one.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Disable automatic acknowledgment; the handler must ack.
    pub fn no_auto_ack(mut self) -> Self {
        self.no_auto_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Do not receive messages published on the same connection.
    pub fn no_local(mut self) -> Self {
        self.no_local = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Caps unacknowledged deliveries by count and total byte size (zero = no cap).
    pub fn receive_limits(mut self, count: u16, size: u32) -> Self {
        self.limit_count = count;
        self.limit_size = size;
        self
    }

    fn flags(&self) -> ConsumeFlags {
        ConsumeFlags {
            auto_ack: !self.no_auto_ack,
            exclusive: self.exclusive,
            no_local: self.no_local,
            no_wait: self.no_wait,
        }
    }

    fn has_limits(&self) -> bool {
        self.limit_count > 0 || self.limit_size > 0
    }
}

/// Consumer initializer factory.
pub struct Consumer {
    name: String,
    queue: Queue,
    handler: Arc<dyn DeliveryHandler>,
    opts: ConsumeOptions,
}

impl Consumer {
    /// Creates the initializer consuming `queue` with `handler`.
    pub fn new(
        queue: Queue,
        handler: Arc<dyn DeliveryHandler>,
        opts: ConsumeOptions,
    ) -> InitializerRef {
        let name = if opts.name.is_empty() {
            format!("{}-consumer", queue.requested_name())
        } else {
            opts.name.clone()
        };
        Arc::new(Self {
            name,
            queue,
            handler,
            opts,
        })
    }
}

#[async_trait]
impl Initializer for Consumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, channel: ChannelRef, scope: Scope) -> Result<(), InitializerError> {
        let state = self.queue.declare(&*channel, &scope).await?;

        if self.opts.has_limits() {
            channel
                .qos(self.opts.limit_count, self.opts.limit_size)
                .await?;
        }

        let mut stream = channel
            .consume(
                &state.name,
                &self.opts.name,
                self.opts.flags(),
                &self.opts.args,
            )
            .await?;
        tracing::debug!(
            consumer = %self.name,
            queue = %state.name,
            generation = scope.generation(),
            "consumer started"
        );

        let handler = Arc::clone(&self.handler);
        let token = scope.token().clone();
        let name = self.name.clone();
        scope.spawn(async move {
            // The stream is only valid while its channel is held.
            let _channel = channel;
            loop {
                let delivery = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(delivery) => delivery,
                        None => {
                            tracing::debug!(consumer = %name, "delivery stream ended");
                            break;
                        }
                    },
                };
                handler.handle(delivery).await;
            }
            Ok(())
        });
        Ok(())
    }
}
