use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Handle for cancelling a relay exchange when the client disconnects
#[derive(Clone)]
pub struct StreamCancelHandle {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
    /// Flag to track if stream completed normally (not a disconnect)
    completed: Arc<AtomicBool>,
}

impl StreamCancelHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender,
            receiver,
            completed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the stream as completed normally.
    /// This should be called when the exchange ends successfully.
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    /// Check if the stream completed normally
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Signal cancellation (only if not already completed)
    pub fn cancel(&self) {
        if !self.is_completed() {
            let _ = self.sender.send(true);
        }
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is signalled, for use in `select!`.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Guard that cancels this handle when dropped unless disarmed first.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            handle: Some(self.clone()),
        }
    }
}

/// Cancels its handle on drop; see [`StreamCancelHandle::drop_guard`].
///
/// Covers the window where the handler future is still waiting and no
/// response body exists yet to notice the client leaving.
pub struct CancelOnDrop {
    handle: Option<StreamCancelHandle>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
    }
}

impl Default for StreamCancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_sets_flag() {
        let handle = StreamCancelHandle::new();
        assert!(!handle.is_cancelled());
        handle.clone().cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_completed_stream_is_not_cancelled() {
        let handle = StreamCancelHandle::new();
        handle.mark_completed();
        handle.cancel();
        assert!(handle.is_completed());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let handle = StreamCancelHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }

    #[test]
    fn test_drop_guard_cancels_unless_disarmed() {
        let handle = StreamCancelHandle::new();
        handle.drop_guard().disarm();
        assert!(!handle.is_cancelled());

        drop(handle.drop_guard());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_pending_without_cancel() {
        let handle = StreamCancelHandle::new();
        let result = tokio::time::timeout(Duration::from_millis(20), handle.cancelled()).await;
        assert!(result.is_err());
    }
}
