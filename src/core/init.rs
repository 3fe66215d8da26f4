//! # Init synchronizer.
//!
//! [`ReadyLatch`] is a one-shot, exactly-once signal from the supervisor loop to
//! the caller of [`Supervisor::init`](crate::Supervisor::init). It fires with
//! `Ok` when the first generation becomes ready, or with the error that kept it
//! from getting there. Later generations never touch it.
//!
//! [`ServiceHandle`] is what `init` returns: a handle to the supervisor loop that
//! keeps running in the background.
//!
//! ```text
//! init(ctx, addr, inits)
//!   ├─ spawn run loop (child token of ctx) ──────────────┐
//!   └─ await latch                                       │
//!        ├─ Ok            ◄── GenerationReady (gen 1) ───┤
//!        ├─ Err(gen)      ◄── gen 1 failed before ready ─┤ (loop stops)
//!        └─ latch dropped ◄── loop returned ─────────────┘ (connect error / cancelled)
//! ```

use parking_lot::Mutex;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{InitError, ServiceError};

/// One-shot readiness signal, fired at most once.
pub(crate) struct ReadyLatch {
    tx: Mutex<Option<oneshot::Sender<Result<(), InitError>>>>,
}

impl ReadyLatch {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<(), InitError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Fires the latch. Returns `false` if it had already fired.
    pub(crate) fn fire(&self, res: Result<(), InitError>) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(res);
                true
            }
            None => false,
        }
    }

    /// True once the latch has fired.
    pub(crate) fn is_fired(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Handle to a supervisor loop running in the background.
///
/// Dropping the handle detaches the loop; it then runs until the context passed
/// to `init` is cancelled.
#[derive(Debug)]
pub struct ServiceHandle {
    token: CancellationToken,
    join: JoinHandle<Result<(), ServiceError>>,
}

impl ServiceHandle {
    pub(crate) fn new(token: CancellationToken, join: JoinHandle<Result<(), ServiceError>>) -> Self {
        Self { token, join }
    }

    /// Token controlling the loop; cancelling it requests a planned shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the loop has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Requests a planned shutdown and waits for the loop to return.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        self.token.cancel();
        self.wait().await
    }

    /// Waits for the loop to return without requesting shutdown.
    ///
    /// Resolves with an error only if dialing was exhausted on a reconnect or the
    /// loop panicked.
    pub async fn wait(self) -> Result<(), ServiceError> {
        match self.join.await {
            Ok(res) => res,
            Err(e) => Err(ServiceError::Panicked {
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latch_fires_once() {
        let (latch, rx) = ReadyLatch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire(Ok(())));
        assert!(!latch.fire(Err(InitError::Canceled)));
        assert!(latch.is_fired());
        assert!(matches!(rx.await, Ok(Ok(()))));
    }
}
