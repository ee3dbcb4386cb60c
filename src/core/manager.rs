//! Manager: submission, execution, and retry orchestration.
//!
//! The manager wraps a job in an execution task, hands it to the worker
//! pool, classifies the outcome, and either closes the job's result pipe or
//! parks a dedicated tokio task on a backoff timer for resubmission.
//!
//! Attempts for a single job are strictly sequential: a resubmission is only
//! scheduled after the prior attempt's task has returned, so no mutex guards
//! the job itself.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::backoff::BackoffPolicy;
use crate::core::error::{is_terminal, AppResult, EngineError};
use crate::core::job::Job;
use crate::core::pool::WorkerPool;
use crate::core::result_pipe::JobResult;

/// Orchestrates job execution on a worker pool with retry and backoff.
pub struct Manager<T> {
    pool: Option<Arc<WorkerPool>>,
    backoff: BackoffPolicy,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Manager<T> {
    /// Create a manager over a worker pool with the default backoff policy.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Arc<Self> {
        Self::from_parts(Some(pool), BackoffPolicy::default())
    }

    /// Assemble a manager from its parts. A manager without a pool rejects
    /// every submission with [`EngineError::PoolUnconfigured`].
    #[must_use]
    pub fn from_parts(pool: Option<Arc<WorkerPool>>, backoff: BackoffPolicy) -> Arc<Self> {
        Arc::new(Self {
            pool,
            backoff,
            _payload: PhantomData,
        })
    }

    /// The worker pool, if one is configured.
    #[must_use]
    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// A weak handle for collaborators that must not keep the manager alive.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> ManagerHandle<T> {
        ManagerHandle {
            inner: Arc::downgrade(self),
        }
    }

    /// Submit a job for execution.
    ///
    /// Wraps the job in an execution task and hands it to the pool. This is
    /// the same path the backoff timer uses for resubmission, so retries
    /// experience identical saturation and cancellation semantics.
    ///
    /// # Errors
    ///
    /// [`EngineError::PoolUnconfigured`] without a pool, otherwise whatever
    /// the pool submission contract returns.
    pub async fn submit_job(
        self: &Arc<Self>,
        ctx: &CancellationToken,
        job: Arc<Job<T>>,
    ) -> Result<(), EngineError> {
        let pool = self.pool.as_ref().ok_or(EngineError::PoolUnconfigured)?;
        let task = Self::execution_task(Arc::clone(self), ctx.clone(), job);
        pool.submit(ctx, Box::pin(task)).await
    }

    /// One attempt: count the run, invoke the work function, settle.
    async fn execution_task(manager: Arc<Self>, ctx: CancellationToken, job: Arc<Job<T>>) {
        let attempt = job.record_run();

        let Some(work) = job.work() else {
            warn!(job_id = %job.id(), "job has no work function");
            let err = anyhow::Error::new(EngineError::MissingWork);
            if job.pipe().write(&ctx, JobResult::Failed(err)).await.is_err() {
                debug!(job_id = %job.id(), "configuration error dropped, pipe already closed");
            }
            job.close();
            return;
        };

        debug!(job_id = %job.id(), attempt, "executing job");
        let outcome = work(ctx.clone(), job.pipe()).await;
        manager.settle(ctx, job, attempt, outcome).await;
    }

    /// Classify an attempt's outcome and close or schedule a retry.
    async fn settle(
        self: Arc<Self>,
        ctx: CancellationToken,
        job: Arc<Job<T>>,
        attempt: u32,
        outcome: AppResult<()>,
    ) {
        let err = match outcome {
            Ok(()) => {
                debug!(job_id = %job.id(), attempt, "job succeeded");
                job.close();
                return;
            }
            Err(err) => err,
        };

        // Cancellation and channel-closed outcomes end the job quietly: the
        // caller either gave up or already walked away.
        if ctx.is_cancelled() || is_terminal(&err) {
            debug!(job_id = %job.id(), attempt, error = %err, "job closed on terminal outcome");
            job.close();
            return;
        }

        if job.can_run() {
            self.schedule_retry(ctx, job, attempt, err);
            return;
        }

        warn!(job_id = %job.id(), runs = job.runs(), error = %err, "retry budget exhausted");
        if job
            .pipe()
            .write(&ctx, JobResult::Failed(err))
            .await
            .is_err()
        {
            debug!(job_id = %job.id(), "final error dropped, pipe already closed");
        }
        job.close();
    }

    /// Park a dedicated task on a backoff timer, then resubmit.
    ///
    /// If the ambient context cancels before the timer fires, the job closes
    /// without resubmission. A resubmission failure is fatal for the job: the
    /// original error is wrapped with the resubmission error and surfaced
    /// once.
    fn schedule_retry(
        self: Arc<Self>,
        ctx: CancellationToken,
        job: Arc<Job<T>>,
        attempt: u32,
        err: anyhow::Error,
    ) {
        let delay = self.backoff.delay(attempt);
        debug!(job_id = %job.id(), attempt, ?delay, error = %err, "scheduling retry");

        tokio::spawn(async move {
            tokio::select! {
                () = ctx.cancelled() => {
                    debug!(job_id = %job.id(), "cancelled while waiting for retry");
                    job.close();
                }
                () = tokio::time::sleep(delay) => {
                    if let Err(resubmit) = self.submit_job(&ctx, Arc::clone(&job)).await {
                        warn!(job_id = %job.id(), error = %resubmit, "resubmission failed");
                        let wrapped = err.context(format!("resubmission failed: {resubmit}"));
                        if job
                            .pipe()
                            .write(&ctx, JobResult::Failed(wrapped))
                            .await
                            .is_err()
                        {
                            debug!(job_id = %job.id(), "resubmission failure dropped, pipe already closed");
                        }
                        job.close();
                    }
                }
            }
        });
    }
}

/// Weak-backed submission handle.
///
/// Lets collaborators (e.g. a pub/sub dispatcher) submit jobs without
/// keeping the manager alive; fails once the manager is gone.
pub struct ManagerHandle<T> {
    inner: Weak<Manager<T>>,
}

impl<T> Clone for ManagerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ManagerHandle<T> {
    /// Submit through the underlying manager.
    ///
    /// # Errors
    ///
    /// [`EngineError::ManagerUnavailable`] if the manager has been dropped,
    /// otherwise the manager's submission contract.
    pub async fn submit_job(
        &self,
        ctx: &CancellationToken,
        job: Arc<Job<T>>,
    ) -> Result<(), EngineError> {
        let manager = self
            .inner
            .upgrade()
            .ok_or(EngineError::ManagerUnavailable)?;
        manager.submit_job(ctx, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_manager() -> Arc<Manager<String>> {
        let opts = PoolOptions::new().with_pool_capacity(2).with_queue_depth(8);
        let pool = WorkerPool::from_options(&opts).unwrap();
        Manager::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn test_single_success_attempt() {
        let manager = test_manager();
        let ctx = CancellationToken::new();
        let invocations = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&invocations);
        let job = Arc::new(Job::builder().work(move |ctx, pipe| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                pipe.write(&ctx, JobResult::Item("done".to_string())).await?;
                Ok(())
            }
        }).build());

        manager.submit_job(&ctx, Arc::clone(&job)).await.unwrap();

        let results = job.pipe().drain(&ctx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results.into_iter().next().unwrap().into_result().unwrap(), "done");
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_work_is_fatal() {
        let manager = test_manager();
        let ctx = CancellationToken::new();
        let job: Arc<Job<String>> = Arc::new(Job::builder().retries(3).build());

        manager.submit_job(&ctx, Arc::clone(&job)).await.unwrap();

        let mut results = job.pipe().drain(&ctx).await;
        assert_eq!(results.len(), 1);
        let err = results.remove(0).into_result().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::MissingWork)
        ));
        // Classified as configuration error: no attempt consumed the budget
        // beyond the single classification run.
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_pool_rejected() {
        let manager: Arc<Manager<String>> =
            Manager::from_parts(None, BackoffPolicy::default());
        let job = Arc::new(Job::new(0, |_ctx, _pipe| async { Ok(()) }));
        let err = manager
            .submit_job(&CancellationToken::new(), job)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PoolUnconfigured));
    }

    #[tokio::test]
    async fn test_handle_fails_after_manager_drop() {
        let manager = test_manager();
        let handle = manager.handle();
        drop(manager);

        let job = Arc::new(Job::new(0, |_ctx, _pipe| async { Ok(()) }));
        let err = handle
            .submit_job(&CancellationToken::new(), job)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ManagerUnavailable));
    }

    #[tokio::test]
    async fn test_terminal_channel_closed_not_retried() {
        let manager = test_manager();
        let ctx = CancellationToken::new();
        let invocations = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&invocations);
        let job = Arc::new(
            Job::builder()
                .retries(5)
                .work(move |_ctx, _pipe| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::Error::new(EngineError::ChannelClosed))
                    }
                })
                .build(),
        );

        manager.submit_job(&ctx, Arc::clone(&job)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(job.pipe().is_closed());
    }
}
