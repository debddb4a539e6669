use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A spawned background loop bound to a cancellation token.
///
/// Dropping the handle cancels the loop; [`BackgroundTask::shutdown`] also
/// waits for it to finish.
pub struct BackgroundTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `body` with a child of `parent`, so cancelling the parent tears
    /// down every task started from it.
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let handle = tokio::spawn(body(cancel.clone()));
        debug!(task = name, "Background task started");
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "Background task ended abnormally");
            }
        }
        debug!(task = self.name, "Background task stopped");
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};

    fn ticker(count: Arc<AtomicUsize>) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, ()> {
        move |cancel| {
            async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            count.fetch_add(1, Ordering::SeqCst);
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = CancellationToken::new();
        let task = BackgroundTask::spawn("ticker", &root, ticker(count.clone()));
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = CancellationToken::new();
        let task = BackgroundTask::spawn("ticker", &root, ticker(count.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(task);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_children() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = CancellationToken::new();
        let a = BackgroundTask::spawn("a", &root, ticker(count.clone()));
        let b = BackgroundTask::spawn("b", &root, ticker(count.clone()));

        root.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!a.is_running());
        assert!(!b.is_running());
        assert_eq!(a.name(), "a");
    }
}
