//! # In-process broker.
//!
//! [`MemoryBroker`] implements [`Dialer`] without any network I/O. It keeps
//! queues, exchanges and bindings in memory and routes messages the way an
//! AMQP 0-9-1 broker does for the default, direct, fanout, topic and headers
//! exchange types.
//!
//! It exists to exercise the supervisor: every failure the supervisor must
//! survive can be injected on demand.
//!
//! ```text
//! fail_next_dials(n)     → the next n dials fail with BrokerError::Dial
//! fail_next_channels(n)  → the next n open_channel calls fail
//! hang_next_closes(n)    → the next n Connection::close calls never return
//! kill_connections(why)  → every live connection closes unsolicited:
//!                            closed() resolves, consumer streams end,
//!                            exclusive queues are dropped
//! ```
//!
//! ## Behavior worth knowing
//! - Declaring an empty queue name yields a fresh `amq.gen-N` name.
//! - Names starting with `amq.` cannot be declared by clients (access refused).
//! - Exclusive queues belong to the declaring connection and vanish with it.
//! - Auto-delete queues vanish when their last consumer goes away.
//! - Unroutable messages are dropped silently, even when `mandatory` is set.
//! - Unacknowledged deliveries are not requeued when their channel dies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Acknowledge, Channel, ChannelRef, ConsumeFlags, Connection, Delivery, DeliveryStream, Dialer,
    ExchangeFlags, ExchangeKind, FieldTable, FieldValue, PublishFlags, Publishing, QueueFlags,
    QueueState,
};
use crate::error::BrokerError;

const BUILTIN_EXCHANGES: [(&str, ExchangeKind); 4] = [
    ("amq.direct", ExchangeKind::Direct),
    ("amq.fanout", ExchangeKind::Fanout),
    ("amq.topic", ExchangeKind::Topic),
    ("amq.headers", ExchangeKind::Headers),
];

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    ids: AtomicU64,
}

#[derive(Default)]
struct State {
    next_name: u64,
    next_tag: u64,
    fail_dials: u32,
    fail_channels: u32,
    hang_closes: u32,
    dial_count: u32,
    acked: u64,
    last_qos: Option<(u16, u32)>,
    connections: HashMap<u64, Arc<ConnShared>>,
    queues: HashMap<String, MemQueue>,
    exchanges: HashMap<String, MemExchange>,
}

struct MemQueue {
    flags: QueueFlags,
    owner: Option<u64>,
    ready: VecDeque<Envelope>,
    consumers: Vec<MemConsumer>,
    had_consumers: bool,
    next: usize,
}

struct MemConsumer {
    conn: u64,
    channel: u64,
    flags: ConsumeFlags,
    tx: mpsc::UnboundedSender<Delivery>,
    closed: CancellationToken,
}

#[derive(Clone)]
struct Envelope {
    msg: Publishing,
    exchange: String,
    routing_key: String,
    redelivered: bool,
}

struct MemExchange {
    kind: ExchangeKind,
    flags: ExchangeFlags,
    bindings: Vec<Binding>,
}

#[derive(Clone, PartialEq)]
enum Destination {
    Queue(String),
    Exchange(String),
}

#[derive(Clone)]
struct Binding {
    destination: Destination,
    routing_key: String,
    args: FieldTable,
}

struct ConnShared {
    id: u64,
    closed: CancellationToken,
    reason: Mutex<Option<BrokerError>>,
}

impl ConnShared {
    fn reason(&self) -> BrokerError {
        self.reason
            .lock()
            .clone()
            .unwrap_or_else(|| BrokerError::closed("connection closed"))
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty broker with the built-in `amq.*` exchanges.
    pub fn new() -> Self {
        let mut state = State::default();
        for (name, kind) in BUILTIN_EXCHANGES {
            state.exchanges.insert(
                name.to_string(),
                MemExchange {
                    kind,
                    flags: ExchangeFlags {
                        durable: true,
                        ..ExchangeFlags::default()
                    },
                    bindings: Vec::new(),
                },
            );
        }
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                ids: AtomicU64::new(1),
            }),
        }
    }

    /// Makes the next `n` dials fail.
    pub fn fail_next_dials(&self, n: u32) {
        self.inner.state.lock().fail_dials = n;
    }

    /// Makes the next `n` channel allocations fail.
    pub fn fail_next_channels(&self, n: u32) {
        self.inner.state.lock().fail_channels = n;
    }

    /// Makes the next `n` client-side connection closes hang forever, as on a half-open socket.
    ///
    /// The connection stays open until [`kill_connections`](Self::kill_connections).
    pub fn hang_next_closes(&self, n: u32) {
        self.inner.state.lock().hang_closes = n;
    }

    /// Closes every live connection as if the broker went away.
    ///
    /// Returns the number of connections closed.
    pub fn kill_connections(&self, reason: &str) -> usize {
        let ids: Vec<u64> = self.inner.state.lock().connections.keys().copied().collect();
        for id in &ids {
            self.inner
                .close_connection(*id, BrokerError::closed(reason.to_string()));
        }
        ids.len()
    }

    /// Total number of dial attempts, failed ones included.
    pub fn dial_count(&self) -> u32 {
        self.inner.state.lock().dial_count
    }

    /// Number of currently open connections.
    pub fn live_connections(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// True if a queue with this exact name exists.
    pub fn queue_exists(&self, name: &str) -> bool {
        self.inner.state.lock().queues.contains_key(name)
    }

    /// Ready (undelivered) messages of a queue; zero if it does not exist.
    pub fn message_count(&self, name: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(name)
            .map_or(0, |q| q.ready.len())
    }

    /// Attached consumers of a queue; zero if it does not exist.
    pub fn consumer_count(&self, name: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(name)
            .map_or(0, |q| q.consumers.len())
    }

    /// Number of deliveries explicitly acknowledged so far.
    pub fn acked_count(&self) -> u64 {
        self.inner.state.lock().acked
    }

    /// Last `(prefetch_count, prefetch_size)` requested through `qos`.
    pub fn last_qos(&self) -> Option<(u16, u32)> {
        self.inner.state.lock().last_qos
    }

    /// Sorted names of every existing queue.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().queues.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl Dialer for MemoryBroker {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, BrokerError> {
        let mut state = self.inner.state.lock();
        state.dial_count += 1;
        if state.fail_dials > 0 {
            state.fail_dials -= 1;
            return Err(BrokerError::Dial {
                reason: format!("{addr}: connection refused"),
            });
        }

        let shared = Arc::new(ConnShared {
            id: self.inner.next_id(),
            closed: CancellationToken::new(),
            reason: Mutex::new(None),
        });
        state.connections.insert(shared.id, Arc::clone(&shared));
        Ok(Box::new(MemoryConnection {
            shared,
            broker: Arc::clone(&self.inner),
        }))
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    fn close_connection(&self, id: u64, reason: BrokerError) {
        let mut state = self.state.lock();
        let Some(shared) = state.connections.remove(&id) else {
            return;
        };
        *shared.reason.lock() = Some(reason);
        shared.closed.cancel();

        state.queues.retain(|_, q| q.owner != Some(id));
        state.drop_consumers(|c| c.conn == id);
        state.unbind_missing_queues();
    }

    fn close_channel(&self, channel: u64) {
        let mut state = self.state.lock();
        state.drop_consumers(|c| c.channel == channel);
    }
}

impl State {
    fn generate_name(&mut self) -> String {
        self.next_name += 1;
        format!("amq.gen-{}", self.next_name)
    }

    /// Removes matching consumers (dropping their senders ends their streams)
    /// and deletes auto-delete queues left without consumers.
    fn drop_consumers(&mut self, pred: impl Fn(&MemConsumer) -> bool) {
        let mut emptied = Vec::new();
        for (name, q) in self.queues.iter_mut() {
            let before = q.consumers.len();
            q.consumers.retain(|c| !pred(c));
            if before > 0 && q.consumers.is_empty() && q.flags.auto_delete && q.had_consumers {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            self.queues.remove(&name);
        }
        self.unbind_missing_queues();
    }

    fn unbind_missing_queues(&mut self) {
        let queues: HashSet<String> = self.queues.keys().cloned().collect();
        for ex in self.exchanges.values_mut() {
            ex.bindings.retain(|b| match &b.destination {
                Destination::Queue(q) => queues.contains(q),
                Destination::Exchange(_) => true,
            });
        }
    }

    fn route(&self, exchange: &str, msg: &Publishing, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            };
        }

        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![exchange.to_string()];
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(ex) = self.exchanges.get(&name) else {
                continue;
            };
            for b in ex.bindings.iter().filter(|b| binding_matches(&ex.kind, b, msg, routing_key)) {
                match &b.destination {
                    Destination::Queue(q) if !out.contains(q) => out.push(q.clone()),
                    Destination::Queue(_) => {}
                    Destination::Exchange(e) => pending.push(e.clone()),
                }
            }
        }
        out
    }

    /// Hands an envelope to the next live consumer, or parks it in the queue.
    fn dispatch(&mut self, broker: &Arc<Inner>, queue: &str, env: Envelope) {
        let tag = self.next_tag + 1;
        let Some(q) = self.queues.get_mut(queue) else {
            return;
        };

        while !q.consumers.is_empty() {
            let idx = q.next % q.consumers.len();
            q.next = q.next.wrapping_add(1);
            let consumer = &q.consumers[idx];

            let acker: Option<Arc<dyn Acknowledge>> = if consumer.flags.auto_ack {
                None
            } else {
                Some(Arc::new(MemoryAcker {
                    broker: Arc::clone(broker),
                    queue: queue.to_string(),
                    envelope: env.clone(),
                    closed: consumer.closed.clone(),
                }))
            };
            let delivery = Delivery::new(
                env.msg.clone(),
                env.exchange.clone(),
                env.routing_key.clone(),
                tag,
                acker,
            )
            .redelivered(env.redelivered);

            if consumer.tx.send(delivery).is_ok() {
                self.next_tag = tag;
                return;
            }
            q.consumers.remove(idx);
        }
        q.ready.push_back(env);
    }

    fn drain_ready(&mut self, broker: &Arc<Inner>, queue: &str) {
        let backlog: Vec<Envelope> = match self.queues.get_mut(queue) {
            Some(q) => q.ready.drain(..).collect(),
            None => return,
        };
        for env in backlog {
            self.dispatch(broker, queue, env);
        }
    }

    fn queue_state(&self, name: &str) -> Result<QueueState, BrokerError> {
        let q = self.queues.get(name).ok_or_else(|| BrokerError::NotFound {
            kind: "queue",
            name: name.to_string(),
        })?;
        Ok(QueueState {
            name: name.to_string(),
            messages: u32::try_from(q.ready.len()).unwrap_or(u32::MAX),
            consumers: u32::try_from(q.consumers.len()).unwrap_or(u32::MAX),
        })
    }

    fn exchange_mut(&mut self, name: &str) -> Result<&mut MemExchange, BrokerError> {
        self.exchanges
            .get_mut(name)
            .ok_or_else(|| BrokerError::NotFound {
                kind: "exchange",
                name: name.to_string(),
            })
    }
}

fn binding_matches(kind: &ExchangeKind, b: &Binding, msg: &Publishing, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
        ExchangeKind::Headers => headers_match(&b.args, msg.properties.headers.as_ref()),
        ExchangeKind::Direct | ExchangeKind::Custom(_) => b.routing_key == routing_key,
    }
}

/// AMQP topic matching: `*` matches one word, `#` matches zero or more.
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn go(p: &[&str], k: &[&str]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(&"#"), _) => go(&p[1..], k) || (!k.is_empty() && go(p, &k[1..])),
            (Some(&"*"), Some(_)) => go(&p[1..], &k[1..]),
            (Some(pw), Some(kw)) if pw == kw => go(&p[1..], &k[1..]),
            _ => false,
        }
    }
    let p: Vec<&str> = pattern.split('.').collect();
    let k: Vec<&str> = if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    };
    go(&p, &k)
}

fn headers_match(args: &FieldTable, headers: Option<&FieldTable>) -> bool {
    let any = matches!(args.get("x-match"), Some(FieldValue::Str(s)) if s == "any");
    let mut wanted = args.iter().filter(|(k, _)| !k.starts_with("x-")).peekable();
    if wanted.peek().is_none() {
        return true;
    }
    let empty = FieldTable::new();
    let headers = headers.unwrap_or(&empty);
    let mut hit = |(k, v): (&String, &FieldValue)| headers.get(k) == Some(v);
    if any { wanted.any(&mut hit) } else { wanted.all(&mut hit) }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    shared: Arc<ConnShared>,
    broker: Arc<Inner>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<ChannelRef, BrokerError> {
        if self.shared.closed.is_cancelled() {
            return Err(self.shared.reason());
        }
        {
            let mut state = self.broker.state.lock();
            if state.fail_channels > 0 {
                state.fail_channels -= 1;
                return Err(BrokerError::Protocol {
                    reason: "channel allocation refused".into(),
                });
            }
        }
        Ok(Arc::new(MemoryChannel {
            id: self.broker.next_id(),
            conn: Arc::clone(&self.shared),
            broker: Arc::clone(&self.broker),
            closed: self.shared.closed.child_token(),
        }))
    }

    async fn closed(&self) -> BrokerError {
        self.shared.closed.cancelled().await;
        self.shared.reason()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let hang = {
            let mut state = self.broker.state.lock();
            let hang = state.hang_closes > 0;
            state.hang_closes = state.hang_closes.saturating_sub(1);
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.broker
            .close_connection(self.shared.id, BrokerError::closed("closed by client"));
        Ok(())
    }
}

/// A channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    id: u64,
    conn: Arc<ConnShared>,
    broker: Arc<Inner>,
    closed: CancellationToken,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.conn.closed.is_cancelled() {
            return Err(self.conn.reason());
        }
        if self.closed.is_cancelled() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn queue_declare(
        &self,
        name: &str,
        flags: QueueFlags,
        _args: &FieldTable,
    ) -> Result<QueueState, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();

        if name.starts_with("amq.") {
            return Err(BrokerError::PreconditionFailed {
                reason: format!("access refused: queue name '{name}' contains reserved prefix 'amq.'"),
            });
        }
        let name = if name.is_empty() {
            state.generate_name()
        } else {
            name.to_string()
        };

        if let Some(q) = state.queues.get(&name) {
            if q.owner.is_some_and(|owner| owner != self.conn.id) {
                return Err(BrokerError::PreconditionFailed {
                    reason: format!("resource locked: queue '{name}' is exclusive to another connection"),
                });
            }
            if q.flags.durable != flags.durable
                || q.flags.auto_delete != flags.auto_delete
                || q.flags.exclusive != flags.exclusive
            {
                return Err(BrokerError::PreconditionFailed {
                    reason: format!("inequivalent arguments for queue '{name}'"),
                });
            }
        } else {
            state.queues.insert(
                name.clone(),
                MemQueue {
                    flags,
                    owner: flags.exclusive.then_some(self.conn.id),
                    ready: VecDeque::new(),
                    consumers: Vec::new(),
                    had_consumers: false,
                    next: 0,
                },
            );
        }
        state.queue_state(&name)
    }

    async fn queue_inspect(&self, name: &str) -> Result<QueueState, BrokerError> {
        self.ensure_open()?;
        self.broker.state.lock().queue_state(name)
    }

    async fn queue_delete(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
        _no_wait: bool,
    ) -> Result<u32, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let q = match state.queues.get(name) {
            Some(q) => q,
            None => return Ok(0),
        };
        if if_unused && !q.consumers.is_empty() {
            return Err(BrokerError::PreconditionFailed {
                reason: format!("queue '{name}' in use"),
            });
        }
        if if_empty && !q.ready.is_empty() {
            return Err(BrokerError::PreconditionFailed {
                reason: format!("queue '{name}' not empty"),
            });
        }
        let removed = state.queues.remove(name).map_or(0, |q| q.ready.len());
        state.unbind_missing_queues();
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    async fn queue_purge(&self, name: &str, _no_wait: bool) -> Result<u32, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let q = state.queues.get_mut(name).ok_or_else(|| BrokerError::NotFound {
            kind: "queue",
            name: name.to_string(),
        })?;
        let purged = q.ready.len();
        q.ready.clear();
        Ok(u32::try_from(purged).unwrap_or(u32::MAX))
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _no_wait: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if exchange.is_empty() {
            return Err(BrokerError::PreconditionFailed {
                reason: "access refused: cannot bind to the default exchange".into(),
            });
        }
        state.queue_state(queue)?;
        let binding = Binding {
            destination: Destination::Queue(queue.to_string()),
            routing_key: routing_key.to_string(),
            args: args.clone(),
        };
        let ex = state.exchange_mut(exchange)?;
        if !ex
            .bindings
            .iter()
            .any(|b| b.destination == binding.destination && b.routing_key == binding.routing_key)
        {
            ex.bindings.push(binding);
        }
        Ok(())
    }

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _args: &FieldTable,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let dest = Destination::Queue(queue.to_string());
        state
            .exchange_mut(exchange)?
            .bindings
            .retain(|b| !(b.destination == dest && b.routing_key == routing_key));
        Ok(())
    }

    async fn exchange_declare(
        &self,
        name: &str,
        kind: &ExchangeKind,
        flags: ExchangeFlags,
        passive: bool,
        _args: &FieldTable,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if passive {
            return state.exchange_mut(name).map(|_| ());
        }
        if let Some(ex) = state.exchanges.get(name) {
            if &ex.kind != kind || ex.flags.durable != flags.durable {
                return Err(BrokerError::PreconditionFailed {
                    reason: format!("inequivalent arguments for exchange '{name}'"),
                });
            }
            return Ok(());
        }
        if name.is_empty() || name.starts_with("amq.") {
            return Err(BrokerError::PreconditionFailed {
                reason: format!("access refused: exchange name '{name}' is reserved"),
            });
        }
        state.exchanges.insert(
            name.to_string(),
            MemExchange {
                kind: kind.clone(),
                flags,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn exchange_delete(
        &self,
        name: &str,
        if_unused: bool,
        _no_wait: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if let Some(ex) = state.exchanges.get(name) {
            if if_unused && !ex.bindings.is_empty() {
                return Err(BrokerError::PreconditionFailed {
                    reason: format!("exchange '{name}' in use"),
                });
            }
        }
        state.exchanges.remove(name);
        let dest = Destination::Exchange(name.to_string());
        for ex in state.exchanges.values_mut() {
            ex.bindings.retain(|b| b.destination != dest);
        }
        Ok(())
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        _no_wait: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        state.exchange_mut(destination)?;
        let dest = Destination::Exchange(destination.to_string());
        let ex = state.exchange_mut(source)?;
        if !ex
            .bindings
            .iter()
            .any(|b| b.destination == dest && b.routing_key == routing_key)
        {
            ex.bindings.push(Binding {
                destination: dest,
                routing_key: routing_key.to_string(),
                args: args.clone(),
            });
        }
        Ok(())
    }

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        _no_wait: bool,
        _args: &FieldTable,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let dest = Destination::Exchange(destination.to_string());
        state
            .exchange_mut(source)?
            .bindings
            .retain(|b| !(b.destination == dest && b.routing_key == routing_key));
        Ok(())
    }

    async fn qos(&self, prefetch_count: u16, prefetch_size: u32) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.state.lock().last_qos = Some((prefetch_count, prefetch_size));
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        flags: ConsumeFlags,
        _args: &FieldTable,
    ) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.broker.state.lock();
            let q = state.queues.get_mut(queue).ok_or_else(|| BrokerError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            })?;
            if flags.exclusive && !q.consumers.is_empty() {
                return Err(BrokerError::PreconditionFailed {
                    reason: format!("access refused: queue '{queue}' already has consumers"),
                });
            }
            q.consumers.push(MemConsumer {
                conn: self.conn.id,
                channel: self.id,
                flags,
                tx,
                closed: self.closed.clone(),
            });
            q.had_consumers = true;
            state.drain_ready(&self.broker, queue);
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|d| (d, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _flags: PublishFlags,
        msg: Publishing,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if !exchange.is_empty() && !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            });
        }
        for queue in state.route(exchange, &msg, routing_key) {
            let env = Envelope {
                msg: msg.clone(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                redelivered: false,
            };
            state.dispatch(&self.broker, &queue, env);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            self.broker.close_channel(self.id);
        }
        Ok(())
    }
}

struct MemoryAcker {
    broker: Arc<Inner>,
    queue: String,
    envelope: Envelope,
    closed: CancellationToken,
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::ChannelClosed);
        }
        let mut state = self.broker.state.lock();
        if requeue {
            let mut env = self.envelope.clone();
            env.redelivered = true;
            state.dispatch(&self.broker, &self.queue, env);
        } else {
            state.acked += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self, _delivery_tag: u64, _multiple: bool) -> Result<(), BrokerError> {
        self.settle(false)
    }

    async fn nack(
        &self,
        _delivery_tag: u64,
        _multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        if requeue { self.settle(true) } else { self.discard() }
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        if requeue { self.settle(true) } else { self.discard() }
    }
}

impl MemoryAcker {
    fn discard(&self) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}
