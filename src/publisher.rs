//! # Reconnect-safe publisher.
//!
//! [`Publisher::new`] returns a cloneable [`Publisher`] handle and an initializer.
//! The initializer runs on every generation and binds the generation's channel
//! into a shared slot; the handle reads the slot on every call.
//!
//! ```text
//! generation N: PublisherInit::init(channel, scope)
//!                 ├─ run the optional init hook on the same channel
//!                 └─ slot ← Bound { channel, token, generation: N }
//!
//! Publisher::publish(exchange, key, msg)
//!   ├─ slot empty or bound token cancelled?
//!   │     ├─ ready_timeout = None    ─► Err(NotReady)          (fail fast)
//!   │     └─ ready_timeout = Some(d) ─► wait ≤ d for next bind, else Err(NotReady)
//!   ├─ reply-to queue has no live name? ─► same fail-fast / wait rule
//!   ├─ apply defaults (reply-to, timestamp, expiration, app id)
//!   └─ channel.publish(...)   (closed channel ─► Err(NotReady))
//! ```
//!
//! The slot is a `tokio::sync::watch` cell: every store replaces the whole value,
//! so readers see either the previous or the new binding, never a mix.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::{sync::watch, time};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{ChannelRef, PublishFlags, Publishing},
    error::{InitializerError, PublishError},
    initializers::{Initializer, InitializerRef, Scope},
    topology::Queue,
};

/// Publisher configuration, snapshotted by [`Publisher::new`].
#[derive(Clone, Default)]
pub struct PublishOptions {
    mandatory: bool,
    immediate: bool,
    timestamp: bool,
    ttl: Option<Duration>,
    app_id: Option<String>,
    reply_to: Option<String>,
    reply_to_queue: Option<Queue>,
    init: Option<InitializerRef>,
    ready_timeout: Option<Duration>,
}

impl PublishOptions {
    /// Ask the broker to return unroutable messages.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Ask the broker to return messages that cannot be delivered immediately.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Stamp messages without a timestamp with the send time.
    pub fn timestamp(mut self) -> Self {
        self.timestamp = true;
        self
    }

    /// Give messages without an expiration this time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Override the application id of every message.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Default reply-to address for messages without one.
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Default reply-to taken from the queue's current effective name.
    ///
    /// Takes precedence over [`reply_to`](Self::reply_to). A server-named queue
    /// has no usable name between a reconnect and its next declaration; publishes
    /// in that window fail with [`PublishError::NotReady`] or wait for the
    /// declaration when [`ready_timeout`](Self::ready_timeout) is set.
    pub fn reply_to_queue(mut self, queue: Queue) -> Self {
        self.reply_to_queue = Some(queue);
        self
    }

    /// Extra setup run on the publisher's channel before it is bound.
    ///
    /// Its failure fails the generation like any initializer error.
    pub fn init(mut self, init: InitializerRef) -> Self {
        self.init = Some(init);
        self
    }

    /// Wait up to `d` for a channel instead of failing immediately while reconnecting.
    pub fn ready_timeout(mut self, d: Duration) -> Self {
        self.ready_timeout = Some(d);
        self
    }
}

impl std::fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishOptions")
            .field("mandatory", &self.mandatory)
            .field("immediate", &self.immediate)
            .field("timestamp", &self.timestamp)
            .field("ttl", &self.ttl)
            .field("app_id", &self.app_id)
            .field("reply_to", &self.reply_to)
            .field("reply_to_queue", &self.reply_to_queue.as_ref().map(Queue::name))
            .field("init", &self.init.as_ref().map(|i| i.name().to_string()))
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}

/// The channel of the generation the publisher is currently bound to.
#[derive(Clone)]
struct Bound {
    channel: ChannelRef,
    token: CancellationToken,
    generation: u64,
}

impl Bound {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

struct Inner {
    name: String,
    opts: PublishOptions,
    slot: watch::Sender<Option<Bound>>,
}

/// Cloneable publish handle that stays valid across reconnects.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

impl Publisher {
    /// Creates a publisher handle and the initializer that keeps it bound.
    ///
    /// Register the initializer with the supervisor; the handle can be used from
    /// anywhere and fails with [`PublishError::NotReady`] until the first bind.
    pub fn new(name: impl Into<String>, opts: PublishOptions) -> (Publisher, InitializerRef) {
        let (slot, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            name: name.into(),
            opts,
            slot,
        });
        let init: InitializerRef = Arc::new(PublisherInit {
            inner: Arc::clone(&inner),
        });
        (Publisher { inner }, init)
    }

    /// True if a live channel is bound right now.
    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    /// Generation of the currently bound channel, if live.
    pub fn generation(&self) -> Option<u64> {
        self.current().map(|b| b.generation)
    }

    /// Publishes `msg` to `exchange` with `routing_key` on the current channel.
    ///
    /// Fails with [`PublishError::NotReady`] while no live channel is bound, while
    /// a `reply_to_queue` has no name on the current connection, and when the
    /// bound channel turns out to be closed.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mut msg: Publishing,
    ) -> Result<(), PublishError> {
        let started = Instant::now();
        let bound = match self.current() {
            Some(bound) => bound,
            None => self.wait_ready(started).await?,
        };

        let reply_to = if msg.properties.reply_to.as_deref().unwrap_or("").is_empty() {
            self.reply_target(started).await?
        } else {
            None
        };
        self.apply_defaults(&mut msg, reply_to);
        tracing::debug!(
            publisher = %self.inner.name,
            exchange,
            routing_key,
            message_id = msg.properties.message_id.as_deref().unwrap_or(""),
            generation = bound.generation,
            "publishing"
        );

        let flags = PublishFlags {
            mandatory: self.inner.opts.mandatory,
            immediate: self.inner.opts.immediate,
        };
        match bound.channel.publish(exchange, routing_key, flags, msg).await {
            Ok(()) => Ok(()),
            // The connection died before its generation was torn down.
            Err(e) if e.is_closed() => {
                tracing::debug!(
                    publisher = %self.inner.name,
                    generation = bound.generation,
                    error = %e,
                    "bound channel is closed"
                );
                Err(PublishError::NotReady {
                    waited: started.elapsed(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn current(&self) -> Option<Bound> {
        self.inner
            .slot
            .borrow()
            .as_ref()
            .filter(|b| b.is_live())
            .cloned()
    }

    /// Time left of the configured wait, or `None` when failing fast.
    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.inner
            .opts
            .ready_timeout
            .map(|limit| limit.saturating_sub(started.elapsed()))
    }

    async fn wait_ready(&self, started: Instant) -> Result<Bound, PublishError> {
        let not_ready = || PublishError::NotReady {
            waited: started.elapsed(),
        };
        let Some(limit) = self.remaining(started) else {
            return Err(not_ready());
        };

        let mut rx = self.inner.slot.subscribe();
        let waited = time::timeout(
            limit,
            rx.wait_for(|b| b.as_ref().is_some_and(Bound::is_live)),
        )
        .await;

        match waited {
            Ok(Ok(slot)) => (*slot).clone().ok_or_else(not_ready),
            _ => Err(not_ready()),
        }
    }

    /// Default reply-to for a message that has none.
    async fn reply_target(&self, started: Instant) -> Result<Option<String>, PublishError> {
        let opts = &self.inner.opts;
        let Some(queue) = &opts.reply_to_queue else {
            return Ok(opts.reply_to.clone().filter(|r| !r.is_empty()));
        };
        if let Some(name) = queue.routable_name() {
            return Ok(Some(name));
        }

        let not_ready = || PublishError::NotReady {
            waited: started.elapsed(),
        };
        let Some(limit) = self.remaining(started) else {
            return Err(not_ready());
        };
        time::timeout(limit, queue.declared())
            .await
            .map(Some)
            .map_err(|_| not_ready())
    }

    fn apply_defaults(&self, msg: &mut Publishing, reply_to: Option<String>) {
        let opts = &self.inner.opts;
        let props = &mut msg.properties;

        if props.reply_to.as_deref().unwrap_or("").is_empty() {
            props.reply_to = reply_to;
        }
        if opts.timestamp && props.timestamp.is_none() {
            props.timestamp = Some(unix_now());
        }
        if let Some(ttl) = opts.ttl.filter(|ttl| !ttl.is_zero()) {
            if props.expiration.as_deref().unwrap_or("").is_empty() {
                props.expiration = Some(ttl.as_millis().to_string());
            }
        }
        if let Some(app_id) = &opts.app_id {
            props.app_id = Some(app_id.clone());
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.inner.name)
            .field("generation", &self.generation())
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Binds each generation's channel into the publisher's slot.
struct PublisherInit {
    inner: Arc<Inner>,
}

#[async_trait]
impl Initializer for PublisherInit {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn init(&self, channel: ChannelRef, scope: Scope) -> Result<(), InitializerError> {
        if let Some(hook) = &self.inner.opts.init {
            hook.init(Arc::clone(&channel), scope.clone()).await?;
        }

        self.inner.slot.send_replace(Some(Bound {
            channel,
            token: scope.token().clone(),
            generation: scope.generation(),
        }));
        tracing::debug!(publisher = %self.inner.name, generation = scope.generation(), "publisher bound");
        Ok(())
    }
}
