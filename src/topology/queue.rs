//! # Queue descriptor.
//!
//! A [`Queue`] holds the requested name, flags and arguments, plus the
//! *effective* name reported by the last successful declaration. Clones share
//! the effective name, so a publisher configured with `reply_to_queue` sees the
//! name a consumer's declaration produced.
//!
//! ## Naming across reconnects
//! ```text
//! Queue::new("jobs")  gen 1 declare("jobs") ─► "jobs"
//!                     gen 2 declare("jobs") ─► "jobs"          (stable)
//!
//! Queue::new("")      gen 1 declare("")     ─► "amq.gen-1"
//!                     teardown              ─► no effective name
//!                     gen 2 declare("")     ─► "amq.gen-2"     (fresh)
//! ```
//!
//! Declaration always uses the *requested* name: a server-generated name is
//! scoped to the connection that produced it and cannot be redeclared. The
//! effective name is recorded together with the declaring generation's token
//! and stops counting as declared once that generation is cancelled.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::broker::{Channel, FieldTable, FieldValue, QueueFlags, QueueState};
use crate::error::BrokerError;
use crate::initializers::Scope;

/// Effective name and the generation it belongs to.
#[derive(Clone, Debug)]
struct Declared {
    name: String,
    generation: u64,
    token: CancellationToken,
}

impl Declared {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Queue descriptor with a shared, generation-scoped effective name.
#[derive(Clone, Debug)]
pub struct Queue {
    name: String,
    flags: QueueFlags,
    args: FieldTable,
    effective: Arc<watch::Sender<Option<Declared>>>,
}

impl Queue {
    /// Describes a queue; an empty name lets the broker generate one.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: QueueFlags::default(),
            args: FieldTable::new(),
            effective: Arc::new(watch::channel(None).0),
        }
    }

    /// Survive broker restarts.
    pub fn durable(mut self, v: bool) -> Self {
        self.flags.durable = v;
        self
    }

    /// Delete the queue once its last consumer goes away.
    pub fn auto_delete(mut self, v: bool) -> Self {
        self.flags.auto_delete = v;
        self
    }

    /// Restrict the queue to the declaring connection.
    pub fn exclusive(mut self, v: bool) -> Self {
        self.flags.exclusive = v;
        self
    }

    /// Do not wait for the broker to confirm operations.
    pub fn no_wait(mut self, v: bool) -> Self {
        self.flags.no_wait = v;
        self
    }

    /// Replaces the declaration arguments.
    pub fn with_args(mut self, args: FieldTable) -> Self {
        self.args = args;
        self
    }

    /// Adds one declaration argument (e.g. `x-message-ttl`).
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// The name this descriptor was created with (possibly empty).
    pub fn requested_name(&self) -> &str {
        &self.name
    }

    /// The effective name while its generation is live, otherwise the requested name.
    pub fn name(&self) -> String {
        self.live()
            .map(|d| d.name)
            .unwrap_or_else(|| self.name.clone())
    }

    /// True while the last declaration's generation is live.
    pub fn is_declared(&self) -> bool {
        self.live().is_some()
    }

    /// Generation of the live declaration, if any.
    pub fn declared_generation(&self) -> Option<u64> {
        self.live().map(|d| d.generation)
    }

    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    pub fn args(&self) -> &FieldTable {
        &self.args
    }

    /// Name usable as a reply-to address right now.
    ///
    /// A fixed name is always usable; a server-generated one only while the
    /// generation that produced it is live.
    pub(crate) fn routable_name(&self) -> Option<String> {
        match self.live() {
            Some(d) => Some(d.name),
            None if !self.name.is_empty() => Some(self.name.clone()),
            None => None,
        }
    }

    /// Waits for the next live declaration and returns its name.
    pub(crate) async fn declared(&self) -> String {
        let mut rx = self.effective.subscribe();
        let name = match rx.wait_for(|d| d.as_ref().is_some_and(Declared::is_live)).await {
            Ok(d) => d.as_ref().map(|d| d.name.clone()),
            Err(_) => None,
        };
        match name {
            Some(name) => name,
            // The sender lives in `self`, so the cell never closes while borrowed.
            None => std::future::pending().await,
        }
    }

    /// Declares the queue on `ch` and records the effective name for `scope`'s generation.
    pub async fn declare(&self, ch: &dyn Channel, scope: &Scope) -> Result<QueueState, BrokerError> {
        let state = ch.queue_declare(&self.name, self.flags, &self.args).await?;
        self.effective.send_replace(Some(Declared {
            name: state.name.clone(),
            generation: scope.generation(),
            token: scope.token().clone(),
        }));
        tracing::debug!(
            requested = %self.name,
            effective = %state.name,
            generation = scope.generation(),
            "queue declared"
        );
        Ok(state)
    }

    fn live(&self) -> Option<Declared> {
        self.effective
            .borrow()
            .as_ref()
            .filter(|d| d.is_live())
            .cloned()
    }

    /// Reports the state of the queue without declaring it.
    pub async fn inspect(&self, ch: &dyn Channel) -> Result<QueueState, BrokerError> {
        ch.queue_inspect(&self.name()).await
    }

    /// Deletes the queue, returning the number of discarded messages.
    pub async fn delete(
        &self,
        ch: &dyn Channel,
        if_unused: bool,
        if_empty: bool,
    ) -> Result<u32, BrokerError> {
        ch.queue_delete(&self.name(), if_unused, if_empty, self.flags.no_wait)
            .await
    }

    /// Drops every ready message, returning how many were purged.
    pub async fn purge(&self, ch: &dyn Channel) -> Result<u32, BrokerError> {
        ch.queue_purge(&self.name(), self.flags.no_wait).await
    }

    /// Binds the queue to `exchange` with `routing_key`.
    pub async fn bind(
        &self,
        ch: &dyn Channel,
        exchange: &str,
        routing_key: &str,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        ch.queue_bind(&self.name(), exchange, routing_key, self.flags.no_wait, args)
            .await
    }

    /// Removes a binding created by [`Queue::bind`].
    pub async fn unbind(
        &self,
        ch: &dyn Channel,
        exchange: &str,
        routing_key: &str,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        ch.queue_unbind(&self.name(), exchange, routing_key, args).await
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connection, Dialer, memory::MemoryBroker};
    use tokio::sync::mpsc;

    fn scope(generation: u64) -> (Scope, CancellationToken) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        (Scope::new("topology".into(), generation, token.clone(), tx), token)
    }

    #[tokio::test]
    async fn generated_name_is_shared_between_clones() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("memory://q").await.unwrap();
        let ch = conn.open_channel().await.unwrap();
        let (scope, _token) = scope(1);

        let queue = Queue::new("").exclusive(true);
        let reply_to = queue.clone();
        assert!(!reply_to.is_declared());
        assert_eq!(reply_to.routable_name(), None);

        let state = queue.declare(&*ch, &scope).await.unwrap();
        assert!(state.name.starts_with("amq.gen-"));
        assert_eq!(reply_to.name(), state.name);
        assert_eq!(reply_to.to_string(), state.name);
        assert_eq!(reply_to.declared_generation(), Some(1));
        assert_eq!(queue.requested_name(), "");

        let again = queue.declare(&*ch, &scope).await.unwrap();
        assert_ne!(again.name, state.name);
    }

    #[tokio::test]
    async fn generated_name_dies_with_its_generation() {
        let broker = MemoryBroker::new();
        let queue = Queue::new("").exclusive(true);

        let conn1 = broker.dial("memory://q").await.unwrap();
        let ch1 = conn1.open_channel().await.unwrap();
        let (scope1, token1) = scope(1);
        let first = queue.declare(&*ch1, &scope1).await.unwrap().name;

        broker.kill_connections("restart");
        token1.cancel();
        assert!(!broker.queue_exists(&first));
        assert!(!queue.is_declared());
        assert_eq!(queue.name(), "");
        assert_eq!(queue.routable_name(), None);

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.declared().await })
        };
        let conn2 = broker.dial("memory://q").await.unwrap();
        let ch2 = conn2.open_channel().await.unwrap();
        let (scope2, _token2) = scope(2);
        let second = queue.declare(&*ch2, &scope2).await.unwrap().name;

        assert_ne!(first, second);
        assert_eq!(waiting.await.unwrap(), second);
        assert_eq!(queue.declared_generation(), Some(2));
    }

    #[tokio::test]
    async fn fixed_name_stays_routable_between_generations() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("memory://q").await.unwrap();
        let ch = conn.open_channel().await.unwrap();
        let (scope, token) = scope(1);

        let queue = Queue::new("replies");
        assert_eq!(queue.routable_name().as_deref(), Some("replies"));
        queue.declare(&*ch, &scope).await.unwrap();
        token.cancel();

        assert!(!queue.is_declared());
        assert_eq!(queue.name(), "replies");
        assert_eq!(queue.routable_name().as_deref(), Some("replies"));
    }

    #[tokio::test]
    async fn bind_inspect_purge_delete() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("memory://q").await.unwrap();
        let ch = conn.open_channel().await.unwrap();
        let none = FieldTable::new();
        let (scope, _token) = scope(1);

        let queue = Queue::new("orders").durable(true);
        queue.declare(&*ch, &scope).await.unwrap();
        queue.bind(&*ch, "amq.direct", "orders", &none).await.unwrap();
        ch.publish("amq.direct", "orders", Default::default(), crate::Publishing::new("1"))
            .await
            .unwrap();

        assert_eq!(queue.inspect(&*ch).await.unwrap().messages, 1);
        assert_eq!(queue.purge(&*ch).await.unwrap(), 1);
        queue.unbind(&*ch, "amq.direct", "orders", &none).await.unwrap();
        assert_eq!(queue.delete(&*ch, false, true).await.unwrap(), 0);
        assert!(!broker.queue_exists("orders"));
        assert_eq!(queue.inspect(&*ch).await.unwrap_err().as_label(), "broker_not_found");
    }
}
