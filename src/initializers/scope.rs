//! # Generation scope.
//!
//! A [`Scope`] is handed to every initializer invocation. It identifies the
//! generation, exposes its cancellation token, and lets the initializer attach
//! long-running workers to the generation's task group.
//!
//! ```text
//! Initializer::init(channel, scope)
//!     ├─ declare / bind / qos ...      (setup; awaited by the generation)
//!     ├─ scope.spawn(delivery_loop)    (joins the generation task group)
//!     └─ return Ok(())                 (counts toward readiness)
//!
//! delivery_loop finishes ──► generation torn down ──► reconnect
//! ```
//!
//! Workers are handed to the generation's join loop through a channel; a worker
//! spawned after teardown started is dropped without being polled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::InitializerError;

/// Boxed worker future attached to a generation.
pub type WorkerFuture = Pin<Box<dyn Future<Output = Result<(), InitializerError>> + Send>>;

/// A worker waiting to be admitted into the generation's task group.
pub(crate) struct Spawned {
    pub(crate) initializer: Arc<str>,
    pub(crate) fut: WorkerFuture,
}

/// Handle to the current connection generation, scoped to one initializer.
#[derive(Clone)]
pub struct Scope {
    name: Arc<str>,
    generation: u64,
    token: CancellationToken,
    spawner: mpsc::UnboundedSender<Spawned>,
}

impl Scope {
    pub(crate) fn new(
        name: Arc<str>,
        generation: u64,
        token: CancellationToken,
        spawner: mpsc::UnboundedSender<Spawned>,
    ) -> Self {
        Self {
            name,
            generation,
            token,
            spawner,
        }
    }

    /// Name of the initializer this scope was created for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation number (1 for the first connection).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when the generation is torn down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once teardown of this generation has started.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when teardown of this generation starts.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Attaches a long-running worker to the generation.
    ///
    /// When the worker finishes (with or without an error) the generation is torn
    /// down. Workers should watch [`Scope::token`] and return once it is cancelled.
    /// Returns `false` if the generation is already being torn down; the worker is
    /// then dropped without running.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = Result<(), InitializerError>> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return false;
        }
        self.spawner
            .send(Spawned {
                initializer: Arc::clone(&self.name),
                fut: Box::pin(fut),
            })
            .is_ok()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_after_cancel_is_refused() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let scope = Scope::new("consumer".into(), 3, token.clone(), tx);

        assert!(scope.spawn(async { Ok(()) }));
        let spawned = rx.try_recv().unwrap();
        assert_eq!(&*spawned.initializer, "consumer");

        token.cancel();
        assert!(!scope.spawn(async { Ok(()) }));
        assert!(rx.try_recv().is_err());
        assert_eq!(scope.generation(), 3);
    }
}
