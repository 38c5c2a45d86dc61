use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A single pending delayed message. Scheduling again replaces (aborts) the
/// previous one, so at most one reset is ever in flight.
#[derive(Default)]
pub struct ResetTimer {
    pending: Option<JoinHandle<()>>,
}

impl ResetTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<T: Send + 'static>(
        &mut self,
        after: Duration,
        tx: mpsc::UnboundedSender<T>,
        message: T,
    ) {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The receiver is gone only when the app is shutting down
            let _ = tx.send(message);
        }));
    }

    pub fn cancel(&mut self) {
        if self.is_pending() {
            debug!("cancelling pending reset");
        }
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ResetTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
