use tokio::sync::watch;

/// Cancellation signal threaded through testers and the dispatcher.
///
/// Cheap to clone; every clone observes the same [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct ScanContext {
    cancelled: watch::Receiver<bool>,
}

/// Owner side of a [`ScanContext`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl ScanContext {
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { cancelled: rx }, CancelHandle { tx })
    }

    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (ctx, _handle) = Self::new();
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves for a context
    /// whose handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ScanContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}
