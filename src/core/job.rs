//! Job definition: a retryable unit of work streaming results through a pipe.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::error::AppResult;
use crate::core::result_pipe::ResultPipe;

/// Default buffer size for a job's result pipe.
pub const DEFAULT_RESULT_BUFFER: usize = 16;

/// Boxed future returned by a work function.
pub type WorkFuture = BoxFuture<'static, AppResult<()>>;

/// A job's work function.
///
/// Receives the ambient cancellation token and the job's result pipe so it
/// can stream zero or more results before returning a final outcome.
pub type WorkFn<T> = Arc<dyn Fn(CancellationToken, Arc<ResultPipe<T>>) -> WorkFuture + Send + Sync>;

/// A schedulable unit of work producing a stream of `T`.
///
/// The id, work function, and retry budget are immutable after construction.
/// The `runs` counter is atomic because the task that schedules a delayed
/// resubmission is not the task that performed the prior attempt; both must
/// observe it safely. No mutex guards the job: there is no compound
/// invariant spanning multiple fields.
pub struct Job<T> {
    id: Uuid,
    work: Option<WorkFn<T>>,
    retries: u32,
    runs: AtomicU32,
    pipe: Arc<ResultPipe<T>>,
}

impl<T> Job<T> {
    /// Create a job with the default result buffer.
    pub fn new<F, Fut>(retries: u32, work: F) -> Self
    where
        F: Fn(CancellationToken, Arc<ResultPipe<T>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        Self::builder().retries(retries).work(work).build()
    }

    /// Start building a job.
    #[must_use]
    pub fn builder() -> JobBuilder<T> {
        JobBuilder::new()
    }

    /// The job's unique identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Maximum additional attempts after the first.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Attempts made so far.
    #[must_use]
    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::Acquire)
    }

    /// Record the start of an attempt; returns the attempt number (1-based).
    ///
    /// Called by the manager before invoking the work function, so the first
    /// attempt observes `runs == 1`.
    pub(crate) fn record_run(&self) -> u32 {
        self.runs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether the job may run again under its retry budget.
    ///
    /// Total attempts come out to `retries + 1`.
    #[must_use]
    pub fn can_run(&self) -> bool {
        self.runs() <= self.retries
    }

    /// The work function, if one was configured.
    pub(crate) fn work(&self) -> Option<WorkFn<T>> {
        self.work.clone()
    }

    /// The job's result pipe, for consuming streamed output.
    #[must_use]
    pub fn pipe(&self) -> Arc<ResultPipe<T>> {
        Arc::clone(&self.pipe)
    }

    /// Close the job's result pipe. Idempotent.
    pub fn close(&self) {
        self.pipe.close();
    }
}

/// Builder for [`Job`].
///
/// A job built without a work function is accepted here; the manager
/// classifies it as a fatal configuration error at execution time.
pub struct JobBuilder<T> {
    work: Option<WorkFn<T>>,
    retries: u32,
    result_buffer: usize,
}

impl<T> JobBuilder<T> {
    /// Create a builder with no retries and the default result buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            work: None,
            retries: 0,
            result_buffer: DEFAULT_RESULT_BUFFER,
        }
    }

    /// Set the retry budget (additional attempts after the first).
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the result pipe buffer size.
    #[must_use]
    pub fn result_buffer(mut self, buffer: usize) -> Self {
        self.result_buffer = buffer;
        self
    }

    /// Set the work function.
    #[must_use]
    pub fn work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn(CancellationToken, Arc<ResultPipe<T>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        self.work = Some(Arc::new(move |ctx, pipe| Box::pin(work(ctx, pipe)) as WorkFuture));
        self
    }

    /// Build the job, assigning it a fresh id and its own result pipe.
    #[must_use]
    pub fn build(self) -> Job<T> {
        Job {
            id: Uuid::new_v4(),
            work: self.work,
            retries: self.retries,
            runs: AtomicU32::new(0),
            pipe: Arc::new(ResultPipe::new(self.result_buffer)),
        }
    }
}

impl<T> Default for JobBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_budget_boundary() {
        let job: Job<u32> = Job::builder().retries(2).build();
        assert_eq!(job.runs(), 0);
        assert!(job.can_run());

        assert_eq!(job.record_run(), 1);
        assert!(job.can_run());
        assert_eq!(job.record_run(), 2);
        assert!(job.can_run());
        assert_eq!(job.record_run(), 3);
        assert!(!job.can_run());
    }

    #[test]
    fn test_zero_retries_single_attempt() {
        let job: Job<u32> = Job::builder().build();
        assert!(job.can_run());
        job.record_run();
        assert!(!job.can_run());
    }

    #[test]
    fn test_builder_without_work() {
        let job: Job<u32> = Job::builder().retries(5).build();
        assert!(job.work().is_none());
        assert_eq!(job.retries(), 5);
        assert!(!job.pipe().is_closed());
    }

    #[test]
    fn test_unique_ids() {
        let a: Job<u32> = Job::builder().build();
        let b: Job<u32> = Job::builder().build();
        assert_ne!(a.id(), b.id());
    }
}
