pub mod pending;

use crate::config::WorkerPoolConfig;
use crate::error::DispatchError;
use crate::logger::{self, Component};
use crate::pool::pending::PendingWork;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot, watch};

type RejectHandler = Box<dyn FnOnce(DispatchError) -> BoxFuture<'static, ()> + Send>;

/// A unit of work for the pool.
///
/// The work future runs at most once. If the pool is shut down before the task gets a worker,
/// the reject handler runs instead and receives `DispatchError::PoolShutdown`.
pub struct Task {
    work: BoxFuture<'static, ()>,
    on_reject: Option<RejectHandler>,
}

impl Task {
    pub fn new(work: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            work: Box::pin(work),
            on_reject: None,
        }
    }

    pub fn on_reject<F, Fut>(mut self, handler: F) -> Self
    where
        F: FnOnce(DispatchError) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_reject = Some(Box::new(move |err| Box::pin(handler(err))));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The pool was shut down before the task started.
    Rejected,
    /// The task panicked. The worker was not affected.
    Panicked,
}

/// Awaitable outcome of a submitted task. Dropping it does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub async fn join(self) -> TaskOutcome {
        self.outcome.await.unwrap_or(TaskOutcome::Rejected)
    }
}

/// A bounded set of workers that runs tasks off the caller's task.
///
/// Pools are created explicitly and owned by whoever created them; clones share the same
/// workers. At most `workers` tasks run at once. Workers are handed out in FIFO order, so
/// tasks that become ready at the same time start in submission order.
///
/// # Examples
/// ```rust
/// use idemio_dispatch::config::WorkerPoolConfig;
/// use idemio_dispatch::pool::{Task, TaskOutcome, WorkerPool};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = WorkerPool::new(&WorkerPoolConfig::new("example", 2));
/// let handle = pool.submit(Task::new(async { println!("ran") }), Duration::from_millis(10));
/// assert_eq!(handle.join().await, TaskOutcome::Completed);
/// pool.shutdown();
/// pool.drain().await;
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    workers: usize,
    permits: Semaphore,
    shutdown: watch::Sender<bool>,
    pending: PendingWork,
    runtime: Handle,
}

impl WorkerPool {
    /// Creates a pool on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime, like `tokio::spawn`.
    pub fn new(config: &WorkerPoolConfig) -> Self {
        Self::with_handle(config, Handle::current())
    }

    pub fn with_handle(config: &WorkerPoolConfig, runtime: Handle) -> Self {
        let workers = config.workers.max(1);
        let (shutdown, _) = watch::channel(false);
        logger::debug(
            Component::WorkerPool,
            None,
            format!("Starting worker pool '{}' with {} workers", config.name, workers),
        );
        Self {
            inner: Arc::new(PoolInner {
                name: config.name.clone(),
                workers,
                permits: Semaphore::new(workers),
                shutdown,
                pending: PendingWork::new(),
                runtime,
            }),
        }
    }

    /// Submits a task to run once at least `delay` has elapsed.
    ///
    /// The delay is served by a timer, not by a worker, so delayed tasks do not take capacity
    /// away from ready ones.
    pub fn submit(&self, task: Task, delay: Duration) -> TaskHandle {
        let (sender, outcome) = oneshot::channel();
        self.inner.pending.enter();
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let result = inner.execute(task, delay).await;
            inner.pending.leave();
            // The submitter may not care about the outcome.
            let _ = sender.send(result);
        });
        TaskHandle { outcome }
    }

    /// Stops accepting work. Tasks that have not started are rejected; running tasks finish.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.send_replace(true) {
            self.inner.permits.close();
            logger::info(
                Component::WorkerPool,
                None,
                format!("Worker pool '{}' shut down", self.inner.name),
            );
        }
    }

    /// Waits until every submitted task has either run or been rejected.
    pub async fn drain(&self) {
        self.inner.pending.wait_idle().await
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Number of submitted tasks that have not yet finished or been rejected.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.count()
    }
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers)
            .field("in_flight", &self.in_flight())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl PoolInner {
    async fn execute(&self, task: Task, delay: Duration) -> TaskOutcome {
        let mut shutdown = self.shutdown.subscribe();
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = closed(&mut shutdown) => return self.reject(task).await,
            }
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.reject(task).await,
        };

        logger::trace(
            Component::WorkerPool,
            None,
            format!("Running task on worker pool '{}'", self.name),
        );
        match AssertUnwindSafe(task.work).catch_unwind().await {
            Ok(()) => TaskOutcome::Completed,
            Err(_) => {
                logger::error(
                    Component::WorkerPool,
                    None,
                    format!("Task panicked on worker pool '{}'", self.name),
                );
                TaskOutcome::Panicked
            }
        }
    }

    async fn reject(&self, task: Task) -> TaskOutcome {
        logger::debug(
            Component::WorkerPool,
            None,
            format!("Rejecting task, worker pool '{}' is shut down", self.name),
        );
        if let Some(handler) = task.on_reject {
            handler(DispatchError::pool_shutdown(&self.name)).await;
        }
        TaskOutcome::Rejected
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    // An error means the pool itself was dropped, which is also a shutdown.
    let _ = shutdown.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    async fn explode() {
        panic!("task failure")
    }

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(&WorkerPoolConfig::new("test", workers))
    }

    #[tokio::test]
    async fn test_delay_is_a_lower_bound() {
        let pool = pool(2);
        let submitted = Instant::now();
        let (tx, rx) = oneshot::channel();
        let handle = pool.submit(
            Task::new(async move {
                let _ = tx.send(submitted.elapsed());
            }),
            Duration::from_millis(100),
        );

        assert_eq!(handle.join().await, TaskOutcome::Completed);
        assert!(rx.await.unwrap() >= Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_by_workers() {
        let pool = pool(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..6)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                pool.submit(
                    Task::new(async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    }),
                    Duration::ZERO,
                )
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().await, TaskOutcome::Completed);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_the_pool() {
        let pool = pool(1);
        let panicked = pool.submit(Task::new(explode()), Duration::ZERO);
        assert_eq!(panicked.join().await, TaskOutcome::Panicked);

        let ok = pool.submit(Task::new(async {}), Duration::ZERO);
        assert_eq!(ok.join().await, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_tasks() {
        let pool = pool(1);
        let running = pool.submit(
            Task::new(async { tokio::time::sleep(Duration::from_millis(50)).await }),
            Duration::ZERO,
        );

        let (tx, rx) = oneshot::channel();
        let delayed = pool.submit(
            Task::new(explode()).on_reject(move |err| async move {
                let _ = tx.send(err);
            }),
            Duration::from_secs(30),
        );

        tokio::task::yield_now().await;
        pool.shutdown();

        assert_eq!(delayed.join().await, TaskOutcome::Rejected);
        assert!(matches!(
            rx.await.unwrap(),
            DispatchError::PoolShutdown { ref pool } if pool == "test"
        ));
        assert_eq!(running.join().await, TaskOutcome::Completed);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let pool = pool(1);
        pool.shutdown();
        assert!(pool.is_shutdown());

        let handle = pool.submit(Task::new(async {}), Duration::ZERO);
        assert_eq!(handle.join().await, TaskOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_tasks() {
        let pool = pool(2);
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            let done = done.clone();
            pool.submit(
                Task::new(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(i * 5),
            );
        }
        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let pool = pool(0);
        assert_eq!(pool.workers(), 1);
        let handle = pool.submit(Task::new(async {}), Duration::ZERO);
        assert_eq!(handle.join().await, TaskOutcome::Completed);
    }
}
