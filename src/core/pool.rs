//! Capacity-bounded executors for job attempts.
//!
//! A [`TaskPool`] runs boxed futures on a bounded set of tokio worker tasks
//! fed by a bounded MPMC run-queue. Workers are spawned on demand up to the
//! configured capacity, recycled after an idle expiry (unless purging is
//! disabled), and optionally pre-spawned.
//!
//! [`WorkerPool`] is the strategy layer: either a single pool, or several
//! pools with tasks routed to whichever currently holds the fewest
//! outstanding tasks. Both satisfy the same submission contract; the choice
//! is a deployment-time throughput tradeoff, not a correctness one.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on the run-queue; idle expiry uses a
//!   timeout on the same receive
//! - **Back-pressure by default**: non-blocking submission rejects with a
//!   saturation error instead of stalling the caller
//! - **Clean shutdown**: dropping the stored sender disconnects the queue and
//!   idle workers exit naturally; in-flight tasks finish

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolOptions;
use crate::core::error::EngineError;

/// A unit of work accepted by a pool: a boxed no-output future.
pub type PoolTask = BoxFuture<'static, ()>;

/// Callback invoked with the panic payload when a task panics.
pub type PanicHandler = Arc<dyn Fn(Box<dyn std::any::Any + Send>) + Send + Sync>;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Worker tasks currently alive.
    pub workers: usize,
    /// Tasks queued or running.
    pub outstanding: usize,
    /// Total tasks accepted.
    pub submitted: u64,
    /// Total tasks that ran to completion.
    pub completed: u64,
    /// Total tasks that panicked.
    pub panicked: u64,
}

/// Internal lock-free counters.
#[derive(Debug, Default)]
struct PoolCounters {
    outstanding: AtomicUsize,
    workers: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// One bounded executor: a run-queue plus up to `pool_capacity` workers.
pub struct TaskPool {
    capacity: usize,
    expiry: Duration,
    nonblocking: bool,
    disable_purge: bool,
    /// Stored sender; taken on shutdown so idle workers disconnect.
    task_tx: Mutex<Option<flume::Sender<PoolTask>>>,
    task_rx: flume::Receiver<PoolTask>,
    counters: Arc<PoolCounters>,
    panic_handler: Option<PanicHandler>,
    shutdown: AtomicBool,
    worker_seq: AtomicUsize,
}

impl TaskPool {
    /// Create a pool from options. Must be called within a tokio runtime
    /// when `prealloc` is set, since workers are spawned eagerly.
    #[must_use]
    pub fn new(opts: &PoolOptions) -> Self {
        let (task_tx, task_rx) = flume::bounded::<PoolTask>(opts.queue_depth);
        let pool = Self {
            capacity: opts.pool_capacity,
            expiry: opts.expiry(),
            nonblocking: opts.nonblocking,
            disable_purge: opts.disable_purge,
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            counters: Arc::new(PoolCounters::default()),
            panic_handler: opts.panic_handler.clone(),
            shutdown: AtomicBool::new(false),
            worker_seq: AtomicUsize::new(0),
        };
        if opts.prealloc {
            for _ in 0..pool.capacity {
                pool.spawn_worker();
            }
        }
        pool
    }

    /// Tasks queued or running. Used for least-tasks routing.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// Snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Hand a task to the pool.
    ///
    /// Fails immediately with [`EngineError::Cancelled`] if `ctx` is already
    /// done. In non-blocking mode (the default) a full run-queue rejects with
    /// [`EngineError::PoolSaturated`]; in blocking mode the call awaits queue
    /// space, still honoring `ctx`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Cancelled`], [`EngineError::PoolSaturated`], or
    /// [`EngineError::PoolShutdown`].
    pub async fn submit(&self, ctx: &CancellationToken, task: PoolTask) -> Result<(), EngineError> {
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(EngineError::PoolShutdown);
        }

        let task_tx = {
            let guard = self.task_tx.lock();
            guard.as_ref().cloned()
        };
        let Some(task_tx) = task_tx else {
            return Err(EngineError::PoolShutdown);
        };

        // Counted before enqueue so least-tasks routing sees queued work.
        self.counters.outstanding.fetch_add(1, Ordering::AcqRel);
        let wrapped = self.instrument(task);

        let enqueued = if self.nonblocking {
            match task_tx.try_send(wrapped) {
                Ok(()) => Ok(()),
                Err(flume::TrySendError::Full(_)) => {
                    warn!("pool run-queue is full, rejecting task");
                    Err(EngineError::PoolSaturated)
                }
                Err(flume::TrySendError::Disconnected(_)) => Err(EngineError::PoolShutdown),
            }
        } else {
            tokio::select! {
                () = ctx.cancelled() => Err(EngineError::Cancelled),
                sent = task_tx.send_async(wrapped) => {
                    sent.map_err(|_| EngineError::PoolShutdown)
                }
            }
        };

        if let Err(err) = enqueued {
            self.counters.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(err);
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.ensure_worker();
        Ok(())
    }

    /// Shut down the pool.
    ///
    /// Idempotent. Drops the stored sender so idle workers disconnect and
    /// exit; in-flight tasks are allowed to finish. Does not block on them.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task_tx.lock().take();
        info!(
            outstanding = self.outstanding(),
            "task pool shutting down, in-flight tasks will finish"
        );
    }

    /// Wrap a task with panic capture and completion accounting.
    fn instrument(&self, task: PoolTask) -> PoolTask {
        let counters = Arc::clone(&self.counters);
        let handler = self.panic_handler.clone();
        Box::pin(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            counters.outstanding.fetch_sub(1, Ordering::AcqRel);
            match outcome {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    if let Some(handler) = handler {
                        handler(payload);
                    } else {
                        error!("task panicked with no panic handler installed");
                    }
                }
            }
        })
    }

    /// Spawn a worker if the pool is under capacity and behind on demand.
    ///
    /// Called after enqueue. The SeqCst load pairs with the expiry-path
    /// decrement in the worker loop so a worker committed to exiting is
    /// never counted as able to serve the just-enqueued task.
    fn ensure_worker(&self) {
        loop {
            let workers = self.counters.workers.load(Ordering::SeqCst);
            if workers >= self.capacity || workers >= self.outstanding() {
                return;
            }
            if self
                .counters
                .workers
                .compare_exchange(workers, workers + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.spawn_worker_inner();
                return;
            }
        }
    }

    /// Spawn a worker unconditionally (pre-allocation path).
    fn spawn_worker(&self) {
        self.counters.workers.fetch_add(1, Ordering::AcqRel);
        self.spawn_worker_inner();
    }

    fn spawn_worker_inner(&self) {
        let worker_id = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let task_rx = self.task_rx.clone();
        let counters = Arc::clone(&self.counters);
        let capacity = self.capacity;
        let expiry = self.expiry;
        let disable_purge = self.disable_purge;

        tokio::spawn(async move {
            debug!(worker_id, "worker started");
            loop {
                let task = if disable_purge {
                    match task_rx.recv_async().await {
                        Ok(task) => task,
                        Err(_) => break, // queue disconnected (shutdown)
                    }
                } else {
                    match tokio::time::timeout(expiry, task_rx.recv_async()).await {
                        Ok(Ok(task)) => task,
                        Ok(Err(_)) => break,
                        Err(_) => {
                            // Idle expiry. Leave the worker count *before*
                            // inspecting the queue: a concurrent submit must
                            // either observe the lowered count and spawn a
                            // replacement, or have enqueued before the check
                            // below and be picked up here. SeqCst pairs this
                            // decrement with the post-enqueue count read in
                            // `ensure_worker`.
                            counters.workers.fetch_sub(1, Ordering::SeqCst);
                            if task_rx.is_empty() {
                                debug!(worker_id, "idle worker expired");
                                return;
                            }
                            // A task raced the timeout. Rejoin if still under
                            // capacity; at capacity a replacement or a busy
                            // worker owns it.
                            let mut workers = counters.workers.load(Ordering::Acquire);
                            let rejoined = loop {
                                if workers >= capacity {
                                    break false;
                                }
                                match counters.workers.compare_exchange(
                                    workers,
                                    workers + 1,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                ) {
                                    Ok(_) => break true,
                                    Err(current) => workers = current,
                                }
                            };
                            if !rejoined {
                                debug!(worker_id, "idle worker expired");
                                return;
                            }
                            continue;
                        }
                    }
                };
                task.await;
            }
            counters.workers.fetch_sub(1, Ordering::AcqRel);
            debug!(worker_id, "worker exiting");
        });
    }
}

/// Worker pool strategy: a closed set of variants selected at construction.
pub enum WorkerPool {
    /// One bounded pool.
    Single(TaskPool),
    /// Several pools; tasks go to the one with the fewest outstanding tasks.
    Sharded(Vec<TaskPool>),
}

impl WorkerPool {
    /// Build a pool from validated options: single when `pool_count == 1`,
    /// sharded otherwise.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if the options fail validation.
    pub fn from_options(opts: &PoolOptions) -> Result<Self, EngineError> {
        opts.validate().map_err(EngineError::InvalidConfig)?;
        let pool = if opts.pool_count == 1 {
            Self::Single(TaskPool::new(opts))
        } else {
            let shards = (0..opts.pool_count).map(|_| TaskPool::new(opts)).collect();
            Self::Sharded(shards)
        };
        info!(
            pool_count = opts.pool_count,
            pool_capacity = opts.pool_capacity,
            queue_depth = opts.queue_depth,
            nonblocking = opts.nonblocking,
            "worker pool initialized"
        );
        Ok(pool)
    }

    /// Hand a task to the selected pool. See [`TaskPool::submit`].
    ///
    /// # Errors
    ///
    /// Same contract as [`TaskPool::submit`] for every strategy.
    pub async fn submit(&self, ctx: &CancellationToken, task: PoolTask) -> Result<(), EngineError> {
        match self {
            Self::Single(pool) => pool.submit(ctx, task).await,
            Self::Sharded(pools) => {
                let target = pools
                    .iter()
                    .min_by_key(|pool| pool.outstanding())
                    .ok_or_else(|| EngineError::InvalidConfig("empty pool set".into()))?;
                target.submit(ctx, task).await
            }
        }
    }

    /// Shut down every underlying pool. Idempotent, non-blocking.
    pub fn shutdown(&self) {
        match self {
            Self::Single(pool) => pool.shutdown(),
            Self::Sharded(pools) => {
                for pool in pools {
                    pool.shutdown();
                }
            }
        }
    }

    /// Aggregated statistics across all underlying pools.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        match self {
            Self::Single(pool) => pool.stats(),
            Self::Sharded(pools) => {
                let mut total = PoolStats::default();
                for stats in pools.iter().map(TaskPool::stats) {
                    total.workers += stats.workers;
                    total.outstanding += stats.outstanding;
                    total.submitted += stats.submitted;
                    total.completed += stats.completed;
                    total.panicked += stats.panicked;
                }
                total
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn small_options() -> PoolOptions {
        PoolOptions::new()
            .with_pool_capacity(2)
            .with_queue_depth(8)
    }

    #[tokio::test]
    async fn test_submit_runs_task() {
        let pool = TaskPool::new(&small_options());
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        pool.submit(
            &CancellationToken::new(),
            Box::pin(async move {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().completed, 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_submit_cancelled_context() {
        let pool = TaskPool::new(&small_options());
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = pool.submit(&ctx, Box::pin(async {})).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_nonblocking_saturation() {
        let opts = PoolOptions::new().with_pool_capacity(1).with_queue_depth(1);
        let pool = TaskPool::new(&opts);
        let ctx = CancellationToken::new();
        let release = Arc::new(Notify::new());

        // Occupy the single worker.
        let gate = Arc::clone(&release);
        pool.submit(&ctx, Box::pin(async move { gate.notified().await }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Fill the run-queue.
        let gate = Arc::clone(&release);
        pool.submit(&ctx, Box::pin(async move { gate.notified().await }))
            .await
            .unwrap();

        // Next submission must fail fast.
        let err = pool.submit(&ctx, Box::pin(async {})).await.unwrap_err();
        assert!(matches!(err, EngineError::PoolSaturated));

        release.notify_waiters();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let pool = TaskPool::new(&small_options());
        pool.shutdown();
        pool.shutdown(); // idempotent
        let err = pool
            .submit(&CancellationToken::new(), Box::pin(async {}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PoolShutdown));
    }

    #[tokio::test]
    async fn test_panic_handler_invoked_and_worker_survives() {
        let panicked = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&panicked);
        let opts = small_options()
            .with_panic_handler(Arc::new(move |_payload| {
                seen.fetch_add(1, Ordering::SeqCst);
            }));
        let pool = TaskPool::new(&opts);
        let ctx = CancellationToken::new();

        pool.submit(&ctx, Box::pin(async { panic!("boom") }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(panicked.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().panicked, 1);

        // The pool still executes new work after a panic.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        pool.submit(
            &ctx,
            Box::pin(async move {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_workers_recycled_after_expiry() {
        let opts = small_options().with_expiry(Duration::from_millis(50));
        let pool = TaskPool::new(&opts);
        let ctx = CancellationToken::new();

        pool.submit(&ctx, Box::pin(async {})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().workers, 1);

        // Idle past the expiry: the worker recycles itself.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.stats().workers, 0);

        // Submission after full recycling spawns a replacement and runs.
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        pool.submit(
            &ctx,
            Box::pin(async move {
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().workers, 1);
    }

    #[tokio::test]
    async fn test_disable_purge_keeps_idle_workers() {
        let opts = small_options()
            .with_expiry(Duration::from_millis(50))
            .with_disable_purge(true);
        let pool = TaskPool::new(&opts);
        let ctx = CancellationToken::new();

        pool.submit(&ctx, Box::pin(async {})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.stats().workers, 1);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_prealloc_spawns_workers() {
        let opts = small_options().with_prealloc(true);
        let pool = TaskPool::new(&opts);
        assert_eq!(pool.stats().workers, 2);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_sharded_routes_to_least_loaded() {
        let opts = PoolOptions::new()
            .with_pool_count(2)
            .with_pool_capacity(1)
            .with_queue_depth(4);
        let pool = WorkerPool::from_options(&opts).unwrap();
        let ctx = CancellationToken::new();
        let release = Arc::new(Notify::new());

        // Park two blockers; least-tasks routing must spread them.
        for _ in 0..2 {
            let gate = Arc::clone(&release);
            pool.submit(&ctx, Box::pin(async move { gate.notified().await }))
                .await
                .unwrap();
        }

        let WorkerPool::Sharded(shards) = &pool else {
            panic!("expected sharded pool");
        };
        assert_eq!(shards[0].outstanding(), 1);
        assert_eq!(shards[1].outstanding(), 1);

        release.notify_waiters();
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_blocking_submit_waits_for_space() {
        let opts = PoolOptions::new()
            .with_pool_capacity(1)
            .with_queue_depth(1)
            .with_nonblocking(false);
        let pool = Arc::new(TaskPool::new(&opts));
        let ctx = CancellationToken::new();
        let release = Arc::new(tokio::sync::Semaphore::new(0));

        for _ in 0..2 {
            let gate = Arc::clone(&release);
            pool.submit(
                &ctx,
                Box::pin(async move {
                    let _permit = gate.acquire().await;
                }),
            )
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Queue is full; this submit blocks until the blockers release.
        let submitter = {
            let pool = Arc::clone(&pool);
            let ctx = ctx.clone();
            tokio::spawn(async move { pool.submit(&ctx, Box::pin(async {})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!submitter.is_finished());

        release.add_permits(2);
        submitter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stats_after_burst() {
        let pool = WorkerPool::from_options(&small_options()).unwrap();
        let ctx = CancellationToken::new();
        for _ in 0..5 {
            pool.submit(&ctx, Box::pin(async {})).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = pool.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.outstanding, 0);
    }
}
