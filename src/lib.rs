//! # Jobstream
//!
//! An asynchronous job execution engine with bounded worker pools, streaming
//! results, and capped-exponential retry.
//!
//! This library provides a task-submission layer that runs user-supplied work
//! on a capacity-bounded pool of tokio tasks, streams zero or more results
//! back to the caller through a cancellation-aware channel, and automatically
//! resubmits failed work with exponential backoff until a configured retry
//! budget is exhausted.
//!
//! ## Core Problem Solved
//!
//! Long-running background work has different needs than request/response
//! handlers:
//!
//! - **Partial results**: a paginated search or a batch import wants to hand
//!   results back as they arrive, not only at the end
//! - **Back-pressure**: callers need a saturation signal instead of silently
//!   stalling when the pool is full
//! - **Transient failure**: most failures deserve a bounded number of delayed
//!   retries, not an immediate error or an infinite loop
//! - **Cooperative cancellation**: abandoning a job must unblock writers and
//!   stop pending retries without tearing down work that is already running
//!
//! ## Key Features
//!
//! - **Streaming result pipe**: bounded FIFO channel, safe to close
//!   concurrently, readable until drained
//! - **Worker pool strategies**: a single bounded pool, or several pools with
//!   least-outstanding-tasks routing, behind one submission contract
//! - **Capped exponential backoff**: 100ms doubling per attempt, capped at 30s
//! - **Panic isolation**: a panicking job is caught and routed to a handler;
//!   the worker survives
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use jobstream::builders::ManagerBuilder;
//! use jobstream::config::PoolOptions;
//! use jobstream::core::{Job, JobResult};
//! use tokio_util::sync::CancellationToken;
//!
//! let manager = ManagerBuilder::new()
//!     .pool_options(PoolOptions::new().with_pool_capacity(4))
//!     .build()?;
//!
//! let job = Arc::new(
//!     Job::builder()
//!         .retries(2)
//!         .work(|ctx, pipe| async move {
//!             pipe.write(&ctx, JobResult::Item("page 1".to_string())).await?;
//!             Ok(())
//!         })
//!         .build(),
//! );
//!
//! let ctx = CancellationToken::new();
//! manager.submit_job(&ctx, Arc::clone(&job)).await?;
//! while let Some(result) = job.pipe().read(&ctx).await {
//!     // Item(..) or Failed(..)
//! }
//! ```
//!
//! For complete examples, see `tests/engine_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

/// Core engine: jobs, result pipes, worker pools, backoff, and the manager.
pub mod core;
/// Configuration models for pools, backoff, and the engine.
pub mod config;
/// Builders to construct engine components from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
