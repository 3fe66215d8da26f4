//! # Message model shared by every broker implementation.
//!
//! [`Publishing`] is what callers send, [`Delivery`] is what consumers receive.
//! Both carry the same [`Properties`]. A delivery owns an optional
//! [`Acknowledge`] capability scoped to the channel it arrived on.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::error::BrokerError;

/// Broker-defined key/value arguments (queue/exchange/consume arguments, headers).
pub type FieldTable = BTreeMap<String, FieldValue>;

/// A single value in a [`FieldTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Table(FieldTable),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// Message properties (AMQP basic properties).
///
/// `None` means "unset"; publisher defaults only fill unset fields
/// (except `app_id`, which is always overridden when configured).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Message type name.
    pub kind: Option<String>,
    pub app_id: Option<String>,
    pub user_id: Option<String>,
    /// Per-message TTL in milliseconds, as a decimal string.
    pub expiration: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub priority: Option<u8>,
    /// `1` transient, `2` persistent.
    pub delivery_mode: Option<u8>,
    pub headers: Option<FieldTable>,
}

/// An outgoing message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publishing {
    pub properties: Properties,
    pub body: Vec<u8>,
}

impl Publishing {
    /// Creates a message with the given body and no properties.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            properties: Properties::default(),
            body: body.into(),
        }
    }

    /// Sets the message id.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.properties.message_id = Some(id.into());
        self
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.properties.correlation_id = Some(id.into());
        self
    }

    /// Sets the reply-to address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.properties.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.properties.content_type = Some(content_type.into());
        self
    }

    /// Sets the message type name.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.properties.kind = Some(kind.into());
        self
    }

    /// Sets the timestamp (seconds since the Unix epoch).
    pub fn with_timestamp(mut self, secs: u64) -> Self {
        self.properties.timestamp = Some(secs);
        self
    }

    /// Sets the expiration (TTL in milliseconds).
    pub fn with_expiration(mut self, expiration: impl Into<String>) -> Self {
        self.properties.expiration = Some(expiration.into());
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.properties
            .headers
            .get_or_insert_with(FieldTable::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Delivery-scoped acknowledgment capability.
///
/// Implemented by each broker backend; only valid on the channel the delivery arrived on.
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
    -> Result<(), BrokerError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// An incoming message.
#[derive(Clone)]
pub struct Delivery {
    pub properties: Properties,
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    acker: Option<Arc<dyn Acknowledge>>,
}

impl Delivery {
    /// Creates a delivery. `acker` is `None` for auto-acknowledged consumers.
    pub fn new(
        publishing: Publishing,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        acker: Option<Arc<dyn Acknowledge>>,
    ) -> Self {
        Self {
            properties: publishing.properties,
            body: publishing.body,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered: false,
            acker,
        }
    }

    /// Marks the delivery as redelivered.
    pub fn redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Shorthand for `properties.message_id`.
    pub fn message_id(&self) -> Option<&str> {
        self.properties.message_id.as_deref()
    }

    /// Shorthand for `properties.correlation_id`.
    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    /// Shorthand for `properties.reply_to`.
    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    /// Acknowledges the delivery. A no-op for auto-acknowledged consumers.
    pub async fn ack(&self, multiple: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.ack(self.delivery_tag, multiple).await,
            None => Ok(()),
        }
    }

    /// Negatively acknowledges the delivery. A no-op for auto-acknowledged consumers.
    pub async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.nack(self.delivery_tag, multiple, requeue).await,
            None => Ok(()),
        }
    }

    /// Rejects the delivery. A no-op for auto-acknowledged consumers.
    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.reject(self.delivery_tag, requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries from one consumer.
///
/// The stream ends when the broker closes the consumer, its channel, or its connection.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;
