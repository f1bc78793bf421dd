use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Bounded pool for work that must not run on a watch callback.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    task_tracker: TaskTracker,
}

impl WorkerPool {
    /// Creates a pool running at most `size` jobs at once.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Runs `job` once a worker is free and waits for its result.
    pub async fn run<F: Future>(&self, job: F) -> F::Output {
        let _permit = self.permits.acquire().await;
        job.await
    }

    /// Queues `job` without waiting for it.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        self.task_tracker.spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => job.await,
                Err(_) => warn!("worker pool closed, dropping job"),
            }
        });
    }

    /// Waits for every queued job.
    pub async fn shutdown(&self) {
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }
}
