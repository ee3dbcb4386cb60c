//! Core engine: jobs, result pipes, worker pools, backoff, and the manager.

pub mod backoff;
pub mod error;
pub mod job;
pub mod manager;
pub mod pool;
pub mod result_pipe;

pub use backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use error::{is_terminal, AppResult, EngineError};
pub use job::{Job, JobBuilder, WorkFn, WorkFuture, DEFAULT_RESULT_BUFFER};
pub use manager::{Manager, ManagerHandle};
pub use pool::{PanicHandler, PoolStats, PoolTask, TaskPool, WorkerPool};
pub use result_pipe::{JobResult, ResultPipe};
