//! Builder to construct a manager (and its pool) from configuration.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{EngineConfig, PoolOptions};
use crate::core::backoff::BackoffPolicy;
use crate::core::error::EngineError;
use crate::core::manager::Manager;
use crate::core::pool::WorkerPool;

/// Builds a [`Manager`] from pool options or a pre-built pool.
///
/// A builder with neither yields a pool-less manager that rejects every
/// submission; that is deliberate so wiring errors surface through the
/// normal submission path.
pub struct ManagerBuilder<T> {
    options: Option<PoolOptions>,
    pool: Option<Arc<WorkerPool>>,
    backoff: BackoffPolicy,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ManagerBuilder<T> {
    /// Start with the default backoff policy and no pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: None,
            pool: None,
            backoff: BackoffPolicy::default(),
            _payload: PhantomData,
        }
    }

    /// Build the pool from options at `build` time.
    #[must_use]
    pub fn pool_options(mut self, options: PoolOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Use an already-constructed pool (shared across managers).
    #[must_use]
    pub fn pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Override the backoff policy.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Construct the manager.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if pool options fail validation.
    pub fn build(self) -> Result<Arc<Manager<T>>, EngineError> {
        let pool = match (self.pool, self.options) {
            (Some(pool), _) => Some(pool),
            (None, Some(options)) => Some(Arc::new(WorkerPool::from_options(&options)?)),
            (None, None) => None,
        };
        Ok(Manager::from_parts(pool, self.backoff))
    }
}

impl<T: Send + 'static> Default for ManagerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a manager straight from a validated [`EngineConfig`].
///
/// # Errors
///
/// [`EngineError::InvalidConfig`] if any section fails validation.
pub fn build_manager<T: Send + 'static>(
    cfg: &EngineConfig,
) -> Result<Arc<Manager<T>>, EngineError> {
    cfg.validate().map_err(EngineError::InvalidConfig)?;
    ManagerBuilder::new()
        .pool_options(cfg.pool.clone())
        .backoff(cfg.backoff.policy())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_from_options() {
        let manager: Arc<Manager<String>> = ManagerBuilder::new()
            .pool_options(PoolOptions::new().with_pool_capacity(2))
            .build()
            .unwrap();
        assert!(manager.pool().is_some());
    }

    #[tokio::test]
    async fn test_build_without_pool() {
        let manager: Arc<Manager<String>> = ManagerBuilder::new().build().unwrap();
        assert!(manager.pool().is_none());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_options() {
        let result: Result<Arc<Manager<String>>, _> = ManagerBuilder::new()
            .pool_options(PoolOptions::new().with_pool_capacity(0))
            .build();
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_build_from_config() {
        let cfg = EngineConfig::from_json_str(
            r#"{"pool": {"pool_count": 2, "pool_capacity": 2}, "backoff": {"base_delay_ms": 10, "max_delay_ms": 100}}"#,
        )
        .unwrap();
        let manager: Arc<Manager<u32>> = build_manager(&cfg).unwrap();
        assert!(manager.pool().is_some());
    }
}
