//! # Exchange descriptor.

use std::fmt;

use crate::broker::{Channel, ExchangeFlags, ExchangeKind, FieldTable};
use crate::error::BrokerError;

/// Exchange descriptor.
///
/// Exchange names are never server-generated, so unlike [`Queue`](super::Queue)
/// an exchange needs no effective-name tracking.
#[derive(Clone, Debug, PartialEq)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    /// Survive broker restarts.
    pub durable: bool,
    /// Delete once the last binding is removed.
    pub auto_delete: bool,
    /// Not publishable by clients; only reachable through exchange bindings.
    pub internal: bool,
    /// Do not wait for the broker to confirm operations.
    pub no_wait: bool,
    pub args: FieldTable,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: impl Into<ExchangeKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            args: FieldTable::new(),
        }
    }

    /// A durable exchange.
    pub fn new_durable(name: impl Into<String>, kind: impl Into<ExchangeKind>) -> Self {
        Self {
            durable: true,
            ..Self::new(name, kind)
        }
    }

    /// An auto-delete exchange.
    pub fn new_auto_delete(name: impl Into<String>, kind: impl Into<ExchangeKind>) -> Self {
        Self {
            auto_delete: true,
            ..Self::new(name, kind)
        }
    }

    fn flags(&self) -> ExchangeFlags {
        ExchangeFlags {
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            no_wait: self.no_wait,
        }
    }

    /// Declares the exchange. With `passive`, only checks that it exists.
    pub async fn declare(&self, ch: &dyn Channel, passive: bool) -> Result<(), BrokerError> {
        ch.exchange_declare(&self.name, &self.kind, self.flags(), passive, &self.args)
            .await
    }

    pub async fn delete(&self, ch: &dyn Channel, if_unused: bool) -> Result<(), BrokerError> {
        ch.exchange_delete(&self.name, if_unused, self.no_wait).await
    }

    /// Routes messages from this exchange to the `destination` exchange.
    pub async fn bind(
        &self,
        ch: &dyn Channel,
        destination: &str,
        routing_key: &str,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        ch.exchange_bind(destination, &self.name, routing_key, self.no_wait, args)
            .await
    }

    pub async fn unbind(
        &self,
        ch: &dyn Channel,
        destination: &str,
        routing_key: &str,
        args: &FieldTable,
    ) -> Result<(), BrokerError> {
        ch.exchange_unbind(destination, &self.name, routing_key, self.no_wait, args)
            .await
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Connection, Dialer, memory::MemoryBroker};

    #[tokio::test]
    async fn declare_bind_and_delete() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("memory://x").await.unwrap();
        let ch = conn.open_channel().await.unwrap();
        let none = FieldTable::new();

        let events = Exchange::new_durable("events", "topic");
        let audit = Exchange::new("audit", ExchangeKind::Fanout);
        assert!(events.durable);
        assert_eq!(events.kind, ExchangeKind::Topic);

        assert_eq!(
            events.declare(&*ch, true).await.unwrap_err().as_label(),
            "broker_not_found"
        );
        events.declare(&*ch, false).await.unwrap();
        events.declare(&*ch, true).await.unwrap();
        audit.declare(&*ch, false).await.unwrap();

        events.bind(&*ch, "audit", "#", &none).await.unwrap();
        assert_eq!(
            events.delete(&*ch, true).await.unwrap_err().as_label(),
            "broker_precondition_failed"
        );
        events.unbind(&*ch, "audit", "#", &none).await.unwrap();
        events.delete(&*ch, true).await.unwrap();
        assert_eq!(
            events.declare(&*ch, true).await.unwrap_err().as_label(),
            "broker_not_found"
        );
    }
}
