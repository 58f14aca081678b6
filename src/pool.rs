//! Bounded worker pool for blocking per-entry jobs.

use crate::error::PipelineError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Runs blocking jobs on at most `workers` threads at a time.
///
/// [`WorkerPool::submit`] waits while every worker is busy, so the only
/// backlog held in memory is the caller's own list. [`WorkerPool::shutdown`]
/// waits for every submitted job and returns right away when nothing was
/// submitted.
///
/// # Example
///
/// ```
/// use benchpipe::WorkerPool;
///
/// # async fn example() -> Result<(), benchpipe::PipelineError> {
/// let mut pool = WorkerPool::new(2);
/// for i in 0..5u32 {
///     pool.submit(move || i * 2).await?;
/// }
/// let results = pool.shutdown().await;
/// assert_eq!(results.len(), 5);
/// # Ok(())
/// # }
/// ```
pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
    workers: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates a pool of `workers` workers. Zero is treated as one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs submitted and not yet collected by [`WorkerPool::shutdown`].
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Queues `job`, waiting for a free worker first.
    pub async fn submit<F>(&mut self, job: F) -> Result<(), PipelineError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::PoolClosed)?;

        self.tasks.spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        Ok(())
    }

    /// Waits for every submitted job and returns their results in
    /// completion order. A job that panicked yields its [`JoinError`].
    pub async fn shutdown(mut self) -> Vec<Result<T, JoinError>> {
        self.permits.close();
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_pool_shuts_down_immediately() {
        let pool: WorkerPool<()> = WorkerPool::new(4);
        let results = tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown of an empty pool must not hang");
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_jobs_complete_within_bound() {
        const JOBS: usize = 12;
        const WORKERS: usize = 3;

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(WORKERS);

        for i in 0..JOBS {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                i
            })
            .await
            .unwrap();
            assert!(pool.pending() <= JOBS);
        }

        let mut results: Vec<usize> = pool
            .shutdown()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        results.sort();
        assert_eq!(results, (0..JOBS).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= WORKERS);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_worker_is_sequential() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pool = WorkerPool::new(1);

        for i in 0..8 {
            let order = Arc::clone(&order);
            pool.submit(move || order.lock().unwrap().push(i)).await.unwrap();
        }
        assert_eq!(pool.shutdown().await.len(), 8);
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let mut pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        pool.submit(|| -> u32 { panic!("boom") }).await.unwrap();
        pool.submit(|| 7).await.unwrap();

        let results = pool.shutdown().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }
}
