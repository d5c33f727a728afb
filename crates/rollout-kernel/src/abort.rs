//! Operator abort
//!
//! Flipping the handle stops the scheduler from launching further hosts.
//! Work already in flight is never cancelled by it.

use std::sync::Arc;
use tokio::sync::watch;

/// Sender side, held by whoever listens for Ctrl-C
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiver side, polled by the orchestrator and scheduler
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Connected handle and signal
#[must_use]
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl AbortSignal {
    /// A signal that never fires
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once abort is requested; pends forever if it never is
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn handle_flips_every_subscriber() {
        let (handle, signal) = abort_pair();
        let second = handle.signal();
        assert!(!signal.is_aborted());
        handle.abort();
        assert!(signal.is_aborted());
        assert!(second.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_does_not_resolve() {
        let signal = AbortSignal::never();
        let raced = tokio::time::timeout(Duration::from_secs(3600), signal.aborted()).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn aborted_resolves_after_abort() {
        let (handle, signal) = abort_pair();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        handle.abort();
        waiter.await.unwrap();
    }
}
