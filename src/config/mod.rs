//! Configuration models for pools, backoff, and the engine.

pub mod engine;

pub use engine::{BackoffConfig, EngineConfig, PoolOptions};
