//! Fire-and-forget side effects.
//!
//! Work spawned here never feeds back into the operation that started it:
//! the caller has already produced its result, a failure is only logged, and
//! nothing is retried. Tasks may be abandoned if the runtime shuts down
//! first. [`BestEffort::settle`] exists so tests and tools can observe the
//! eventual state.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Set of outstanding best-effort tasks.
#[derive(Debug, Clone, Default)]
pub struct BestEffort {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BestEffort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` without waiting for it. Must be called inside a tokio runtime.
    pub fn spawn<F, E>(&self, label: &'static str, work: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            match work.await {
                Ok(()) => debug!(task = label, "Best-effort task finished"),
                Err(e) => warn!(task = label, error = %e, "Best-effort task failed"),
            }
        });

        let mut tasks = self.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Number of tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait until every task spawned so far (and any spawned meanwhile) is done.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Best-effort task panicked");
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_settle_waits_for_tasks() {
        let tasks = BestEffort::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = Arc::clone(&done);
            tasks.spawn("count", async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            });
        }

        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let tasks = BestEffort::new();
        tasks.spawn("fail", async { Err::<(), _>("disk full") });
        tasks.settle().await;
        assert_eq!(tasks.pending(), 0);
    }
}
