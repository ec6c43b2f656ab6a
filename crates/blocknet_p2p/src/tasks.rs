//! Background task tracking for bounded shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Every task the server spawns (accept loop, read loops, keep-alive,
/// discovery) is tracked here so `stop()` can wait for them and abort
/// whatever is still running when the grace period runs out.
#[derive(Clone, Default)]
pub(crate) struct TaskSet {
    inner: Arc<Mutex<JoinSet<()>>>,
}

impl TaskSet {
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.inner.lock();
        // Reap finished tasks so a long-lived server does not accumulate them.
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait up to `grace` for all tracked tasks, then abort the rest.
    /// Returns the number of tasks that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        loop {
            // Tasks may still spawn children while winding down, so keep
            // taking the set until it stays empty.
            let mut set = std::mem::take(&mut *self.inner.lock());
            if set.is_empty() {
                return 0;
            }
            let drained = tokio::time::timeout_at(deadline, async {
                while set.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                let mut aborted = set.len();
                set.shutdown().await;
                let mut late = std::mem::take(&mut *self.inner.lock());
                aborted += late.len();
                late.shutdown().await;
                return aborted;
            }
        }
    }
}
