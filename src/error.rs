//! Error types used by the rabbitvisor runtime, initializers and publishers.
//!
//! This module defines the error enums for every layer:
//!
//! - [`BrokerError`]: failures reported by the broker client collaborator.
//! - [`ConnectError`]: the connector gave up dialing.
//! - [`InitializerError`]: returned by initializers and their background workers.
//! - [`GenerationError`]: why one connection generation was torn down.
//! - [`ServiceError`]: returned by [`Supervisor::run`](crate::Supervisor::run).
//! - [`InitError`]: returned by [`Supervisor::init`](crate::Supervisor::init).
//! - [`PublishError`]: returned by [`Publisher::publish`](crate::Publisher::publish).
//!
//! All types provide `as_label` for logging/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors reported by the broker client.
///
/// The supervision core treats these as opaque; it only cares whether a
/// failure happened while dialing, allocating a channel or running an initializer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The transport connection could not be established.
    #[error("dial failed: {reason}")]
    Dial {
        /// Underlying client message.
        reason: String,
    },

    /// The connection was closed (by the broker or locally).
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Close reason reported by the broker.
        reason: String,
    },

    /// The channel is closed and cannot be used anymore.
    #[error("channel closed")]
    ChannelClosed,

    /// A queue or exchange referenced by the operation does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// `"queue"` or `"exchange"`.
        kind: &'static str,
        /// Name of the missing entity.
        name: String,
    },

    /// The broker refused the operation because of conflicting state.
    #[error("precondition failed: {reason}")]
    PreconditionFailed {
        /// Broker message.
        reason: String,
    },

    /// Any other protocol-level failure.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Broker or client message.
        reason: String,
    },
}

impl BrokerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Dial { .. } => "broker_dial",
            BrokerError::ConnectionClosed { .. } => "broker_connection_closed",
            BrokerError::ChannelClosed => "broker_channel_closed",
            BrokerError::NotFound { .. } => "broker_not_found",
            BrokerError::PreconditionFailed { .. } => "broker_precondition_failed",
            BrokerError::Protocol { .. } => "broker_protocol",
        }
    }

    /// True when the channel or its connection is gone.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionClosed { .. } | BrokerError::ChannelClosed
        )
    }

    /// Convenience constructor for [`BrokerError::ConnectionClosed`].
    pub fn closed(reason: impl Into<String>) -> Self {
        BrokerError::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by the connector.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Every dial attempt failed.
    #[error("connect to {addr} failed after {attempts} attempts: {source}")]
    Exhausted {
        /// Address that was dialed.
        addr: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: BrokerError,
    },

    /// The outer context was cancelled while retrying.
    #[error("connect cancelled")]
    Canceled,
}

impl ConnectError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectError::Exhausted { .. } => "connect_exhausted",
            ConnectError::Canceled => "connect_canceled",
        }
    }
}

/// # Errors returned by initializers and their background workers.
///
/// Any error tears down the current connection generation; the supervisor then
/// reconnects and runs every initializer again from scratch.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InitializerError {
    /// A broker operation failed (declare, consume, bind, ...).
    #[error("broker operation failed: {0}")]
    Broker(#[from] BrokerError),

    /// Initializer-defined failure.
    #[error("initializer failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The initializer observed cancellation of its generation.
    #[error("context cancelled")]
    Canceled,
}

impl InitializerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InitializerError::Broker(_) => "initializer_broker",
            InitializerError::Fail { .. } => "initializer_failed",
            InitializerError::Canceled => "initializer_canceled",
        }
    }

    /// Convenience constructor for [`InitializerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        InitializerError::Fail {
            error: error.into(),
        }
    }
}

/// # Reasons a connection generation ended.
///
/// All of them converge on the same join point and lead to the same action:
/// tear down, then reconnect unless shutdown was planned.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GenerationError {
    /// A sub-channel could not be opened on a live connection.
    #[error("channel allocation for '{initializer}' failed: {source}")]
    ChannelAllocation {
        /// Initializer the channel was requested for.
        initializer: String,
        /// Broker error.
        #[source]
        source: BrokerError,
    },

    /// An initializer returned an error during setup.
    #[error("initializer '{initializer}' failed: {source}")]
    Initializer {
        /// Initializer name.
        initializer: String,
        /// The returned error.
        #[source]
        source: InitializerError,
    },

    /// A background worker spawned by an initializer finished.
    ///
    /// A worker that returns `Ok` (e.g. its delivery stream drained) still ends the generation.
    #[error("worker of '{initializer}' stopped{}", .source.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    WorkerStopped {
        /// Initializer that spawned the worker.
        initializer: String,
        /// The error, if the worker failed.
        #[source]
        source: Option<InitializerError>,
    },

    /// The broker closed the connection unexpectedly.
    #[error("connection lost: {source}")]
    ConnectionClosed {
        /// Close reason.
        #[source]
        source: BrokerError,
    },

    /// A generation task (initializer or worker) panicked.
    #[error("generation task panicked: {reason}")]
    TaskPanicked {
        /// Join error message.
        reason: String,
    },
}

impl GenerationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            GenerationError::ChannelAllocation { .. } => "generation_channel_allocation",
            GenerationError::Initializer { .. } => "generation_initializer",
            GenerationError::WorkerStopped { .. } => "generation_worker_stopped",
            GenerationError::ConnectionClosed { .. } => "generation_connection_closed",
            GenerationError::TaskPanicked { .. } => "generation_task_panicked",
        }
    }
}

/// # Errors produced by the supervisor loop itself.
///
/// Faults inside a generation are never surfaced here: they cause a reconnect.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The connector exhausted its attempts.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The background supervisor task panicked or was aborted.
    #[error("supervisor task panicked: {reason}")]
    Panicked {
        /// Join error message.
        reason: String,
    },
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Connect(e) => e.as_label(),
            ServiceError::Panicked { .. } => "service_panicked",
        }
    }
}

/// # Errors returned while waiting for the first generation to come up.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InitError {
    /// The connector exhausted its attempts.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The first generation failed before every initializer completed setup.
    #[error("first connection generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The outer context was cancelled before the first generation was ready.
    #[error("cancelled before initialization completed")]
    Canceled,

    /// The background supervisor task panicked.
    #[error("supervisor task panicked: {reason}")]
    Panicked {
        /// Join error message.
        reason: String,
    },
}

impl InitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InitError::Connect(e) => e.as_label(),
            InitError::Generation(e) => e.as_label(),
            InitError::Canceled => "init_canceled",
            InitError::Panicked { .. } => "init_panicked",
        }
    }
}

impl From<ServiceError> for InitError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Connect(e) => InitError::Connect(e),
            ServiceError::Panicked { reason } => InitError::Panicked { reason },
        }
    }
}

/// # Errors returned by [`Publisher::publish`](crate::Publisher::publish).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PublishError {
    /// No live channel is bound: never initialized, or a reconnect is in progress.
    #[error("channel is not initialized")]
    NotReady {
        /// How long the call waited for a channel (zero when failing fast).
        waited: Duration,
    },

    /// The broker rejected the publish.
    #[error("publish failed: {0}")]
    Broker(#[from] BrokerError),
}

impl PublishError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::NotReady { .. } => "publish_not_ready",
            PublishError::Broker(_) => "publish_broker",
        }
    }

    /// True for [`PublishError::NotReady`]; callers may retry these later.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, PublishError::NotReady { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_stopped_message_mentions_error_only_when_present() {
        let clean = GenerationError::WorkerStopped {
            initializer: "consumer".into(),
            source: None,
        };
        assert_eq!(clean.to_string(), "worker of 'consumer' stopped");

        let failed = GenerationError::WorkerStopped {
            initializer: "consumer".into(),
            source: Some(InitializerError::fail("boom")),
        };
        assert_eq!(
            failed.to_string(),
            "worker of 'consumer' stopped: initializer failed: boom"
        );
    }

    #[test]
    fn service_error_converts_into_init_error() {
        let err: InitError = ServiceError::Connect(ConnectError::Canceled).into();
        assert!(matches!(err, InitError::Connect(ConnectError::Canceled)));
        assert_eq!(err.as_label(), "connect_canceled");
    }

    #[test]
    fn not_ready_is_flagged() {
        let err = PublishError::NotReady {
            waited: Duration::ZERO,
        };
        assert!(err.is_not_ready());
        assert!(!PublishError::Broker(BrokerError::ChannelClosed).is_not_ready());
    }
}
