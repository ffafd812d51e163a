//! Cooperative cancellation for spawned tasks and in-flight continuations.
//!
//! A [`CancelSource`] is held by whoever owns the work; every task it spawns
//! receives a [`CancelToken`]. A token reports cancelled once the source calls
//! [`CancelSource::cancel`] or is dropped, so an owner that goes away takes its
//! tasks with it.

use tokio::sync::watch;

/// Owning side of a cancellation pair.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel every token handed out. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observing side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Liveness check for continuations about to mutate shared state.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the source was dropped, which also cancels.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
