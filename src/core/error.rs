//! Error types for engine operations.

use thiserror::Error;

/// Errors produced by engine components.
///
/// The variants fall into three groups that the manager treats differently:
/// configuration errors (`PoolUnconfigured`, `ManagerUnavailable`,
/// `MissingWork`, `InvalidConfig`) are fatal and never retried; terminal
/// errors (`Cancelled`, `ChannelClosed`) close the job without retry; pool
/// submission errors (`PoolSaturated`, `PoolShutdown`) surface back-pressure
/// to the submitter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The result pipe was already closed by its owner.
    #[error("result channel closed")]
    ChannelClosed,
    /// The ambient cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
    /// The pool rejected the task because its run-queue is full.
    #[error("worker pool saturated")]
    PoolSaturated,
    /// The pool has been shut down and accepts no further tasks.
    #[error("worker pool has been shut down")]
    PoolShutdown,
    /// The manager has no worker pool configured.
    #[error("no worker pool configured")]
    PoolUnconfigured,
    /// The manager behind a handle has been dropped.
    #[error("manager unavailable")]
    ManagerUnavailable,
    /// The job was built without a work function.
    #[error("job has no work function")]
    MissingWork,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// True for errors that close a job immediately without retry.
    ///
    /// Cancellation means the caller gave up; a closed channel means the
    /// caller already abandoned the job. Neither is worth another attempt.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ChannelClosed)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Work functions return this so user code can bubble up arbitrary error
/// chains; the manager inspects the chain to classify the outcome.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Whether an error chain terminates the job rather than triggering a retry.
///
/// An error is terminal when it is, or wraps, cancellation or the
/// channel-closed sentinel. Any other error is retryable subject to the
/// job's budget.
#[must_use]
pub fn is_terminal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .is_some_and(EngineError::is_terminal)
    })
}
