//! # Broker client seam.
//!
//! The supervisor never talks to a concrete client library. It dials through a
//! [`Dialer`], receives a [`Connection`], and opens one [`Channel`] per
//! initializer. Every primitive (declare, consume, publish, ...) is a black box
//! provided by the implementation.
//!
//! ```text
//! Dialer::dial(addr) ──► Connection ──┬─► open_channel() ──► Channel (initializer #1)
//!                                     ├─► open_channel() ──► Channel (initializer #N)
//!                                     └─► closed()  (resolves on unsolicited close)
//! ```
//!
//! ## Implementations
//! - `memory::MemoryBroker` (feature `memory`): in-process broker with fault injection (tests, demos).
//! - `amqp::AmqpDialer` (feature `amqp`): adapter over `lapin`.
//!
//! ## Ownership
//! A [`Connection`] belongs to exactly one supervisor generation and is never
//! reused after it closes. Channels never outlive their connection.

mod message;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BrokerError;

pub use message::{
    Acknowledge, Delivery, DeliveryStream, FieldTable, FieldValue, Properties, Publishing,
};

/// Shared handle to an open channel.
pub type ChannelRef = Arc<dyn Channel>;

/// Opens transport connections to a broker address.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Dials `addr` once. Retries are the connector's job.
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, BrokerError>;
}

/// One transport connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Opens a new multiplexed channel on this connection.
    async fn open_channel(&self) -> Result<ChannelRef, BrokerError>;

    /// Resolves with the close reason once the connection is closed.
    ///
    /// May be awaited concurrently and repeatedly; resolves immediately if already closed.
    async fn closed(&self) -> BrokerError;

    /// Closes the connection and every channel on it. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Flags for queue declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFlags {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

/// Flags for exchange declaration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExchangeFlags {
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
}

/// Flags for starting a consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumeFlags {
    /// Deliveries are acknowledged by the broker on send.
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Flags for publishing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishFlags {
    pub mandatory: bool,
    pub immediate: bool,
}

/// State reported by a queue declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueState {
    /// Effective name (server-generated when an empty name was declared).
    pub name: String,
    pub messages: u32,
    pub consumers: u32,
}

/// Exchange type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    Custom(String),
}

impl ExchangeKind {
    /// Wire name of the exchange type.
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(s) => s,
        }
    }
}

impl From<&str> for ExchangeKind {
    fn from(s: &str) -> Self {
        match s {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Custom(other.to_string()),
        }
    }
}

/// One multiplexed channel, bound to a single initializer for one generation.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declares a queue; an empty `name` asks the broker to generate one.
    async fn queue_declare(
        &self,
        name: &str,
        flags: QueueFlags,
        args: &FieldTable,
    ) -> Result<QueueState, BrokerError>;

    /// Passive declare: reports the state of an existing queue.
    async fn queue_inspect(&self, name: &str) -> Result<QueueState, BrokerError>;

    /// Deletes a queue, returning the number of discarded messages.
    async fn queue_delete(
        &self,
        name: &str,
        if_unused: bool,
        if_empty: bool,
        no_wait: bool,
    ) -> Result<u32, BrokerError>;

    /// Drops every ready message of a queue, returning how many were purged.
    async fn queue_purge(&self, name: &str, no_wait: bool) -> Result<u32, BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        no_wait: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError>;

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        args: &FieldTable,
    ) -> Result<(), BrokerError>;

    /// Declares an exchange; with `passive` only checks that it exists.
    async fn exchange_declare(
        &self,
        name: &str,
        kind: &ExchangeKind,
        flags: ExchangeFlags,
        passive: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError>;

    async fn exchange_delete(
        &self,
        name: &str,
        if_unused: bool,
        no_wait: bool,
    ) -> Result<(), BrokerError>;

    /// Routes messages from `source` to `destination`.
    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        no_wait: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError>;

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        no_wait: bool,
        args: &FieldTable,
    ) -> Result<(), BrokerError>;

    /// Limits unacknowledged deliveries on this channel.
    ///
    /// Zero means "no limit" for either value.
    async fn qos(&self, prefetch_count: u16, prefetch_size: u32) -> Result<(), BrokerError>;

    /// Starts a consumer on `queue`.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        flags: ConsumeFlags,
        args: &FieldTable,
    ) -> Result<DeliveryStream, BrokerError>;

    /// Publishes one message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        flags: PublishFlags,
        msg: Publishing,
    ) -> Result<(), BrokerError>;

    /// Closes the channel. Idempotent.
    async fn close(&self) -> Result<(), BrokerError>;
}
