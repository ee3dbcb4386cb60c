//! Engine, pool, and backoff configuration structures.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::backoff::BackoffPolicy;
use crate::core::pool::PanicHandler;

/// Worker pool configuration.
///
/// `pool_count == 1` selects the single-pool strategy; anything larger
/// selects sharded pools with least-outstanding-tasks routing. Each pool gets
/// its own run-queue and capacity.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Number of pools (1 = single-pool mode).
    pub pool_count: usize,
    /// Maximum concurrent tasks per pool.
    pub pool_capacity: usize,
    /// Maximum queued tasks per pool.
    pub queue_depth: usize,
    /// Idle-worker recycle interval, in milliseconds.
    pub expiry_ms: u64,
    /// Reject instead of block when the run-queue is full.
    pub nonblocking: bool,
    /// Pre-spawn all workers at construction.
    pub prealloc: bool,
    /// Disable idle-worker recycling.
    pub disable_purge: bool,
    /// Invoked with the payload of an uncaught panic inside a task.
    #[serde(skip)]
    pub panic_handler: Option<PanicHandler>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_count: 1,
            pool_capacity: num_cpus::get(),
            queue_depth: 128,
            expiry_ms: 10_000,
            nonblocking: true,
            prealloc: false,
            disable_purge: false,
            panic_handler: None,
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("pool_count", &self.pool_count)
            .field("pool_capacity", &self.pool_capacity)
            .field("queue_depth", &self.queue_depth)
            .field("expiry_ms", &self.expiry_ms)
            .field("nonblocking", &self.nonblocking)
            .field("prealloc", &self.prealloc)
            .field("disable_purge", &self.disable_purge)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

impl PoolOptions {
    /// Default options: one pool sized to the CPU count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of pools.
    #[must_use]
    pub fn with_pool_count(mut self, pool_count: usize) -> Self {
        self.pool_count = pool_count;
        self
    }

    /// Set the per-pool worker capacity.
    #[must_use]
    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// Set the per-pool run-queue depth.
    #[must_use]
    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    /// Set the idle-worker recycle interval. Millisecond precision; anything
    /// finer is rounded up so a positive duration never validates as zero.
    #[must_use]
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        let mut millis = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 && !expiry.is_zero() {
            millis = 1;
        }
        self.expiry_ms = millis;
        self
    }

    /// Select blocking or non-blocking submission.
    #[must_use]
    pub fn with_nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    /// Pre-spawn all workers at construction.
    #[must_use]
    pub fn with_prealloc(mut self, prealloc: bool) -> Self {
        self.prealloc = prealloc;
        self
    }

    /// Disable idle-worker recycling.
    #[must_use]
    pub fn with_disable_purge(mut self, disable_purge: bool) -> Self {
        self.disable_purge = disable_purge;
        self
    }

    /// Install a panic handler.
    #[must_use]
    pub fn with_panic_handler(mut self, handler: PanicHandler) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    /// Idle-worker recycle interval as a `Duration`.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    /// Validate pool option values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_count == 0 {
            return Err("pool_count must be greater than 0".into());
        }
        if self.pool_capacity == 0 {
            return Err("pool_capacity must be greater than 0".into());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be greater than 0".into());
        }
        if self.expiry_ms == 0 && !self.disable_purge {
            return Err("expiry_ms must be greater than 0 unless purging is disabled".into());
        }
        Ok(())
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Validate backoff values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".into());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be at least base_delay_ms".into());
        }
        Ok(())
    }

    /// Convert into an executable policy.
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool options.
    pub pool: PoolOptions,
    /// Retry backoff options.
    pub backoff: BackoffConfig,
}

impl EngineConfig {
    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field, prefixed with its
    /// section.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool: {e}"))?;
        self.backoff
            .validate()
            .map_err(|e| format!("backoff: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: EngineConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let opts = PoolOptions::new().with_pool_capacity(0);
        assert!(opts.validate().unwrap_err().contains("pool_capacity"));
    }

    #[test]
    fn test_zero_expiry_requires_disabled_purge() {
        let mut opts = PoolOptions::new();
        opts.expiry_ms = 0;
        assert!(opts.validate().is_err());
        assert!(opts.with_disable_purge(true).validate().is_ok());
    }

    #[test]
    fn test_sub_second_expiry_preserved() {
        let opts = PoolOptions::new().with_expiry(Duration::from_millis(500));
        assert_eq!(opts.expiry_ms, 500);
        assert!(opts.validate().is_ok());

        // A positive duration must never round down to an invalid zero.
        let opts = PoolOptions::new().with_expiry(Duration::from_micros(10));
        assert_eq!(opts.expiry_ms, 1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let cfg = BackoffConfig {
            base_delay_ms: 500,
            max_delay_ms: 100,
        };
        assert!(cfg.validate().unwrap_err().contains("max_delay_ms"));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = EngineConfig::from_json_str(
            r#"{"pool": {"pool_count": 3, "pool_capacity": 8}, "backoff": {"base_delay_ms": 50}}"#,
        )
        .unwrap();
        assert_eq!(cfg.pool.pool_count, 3);
        assert_eq!(cfg.pool.pool_capacity, 8);
        assert!(cfg.pool.nonblocking);
        assert_eq!(cfg.backoff.base_delay_ms, 50);
        assert_eq!(cfg.backoff.max_delay_ms, 30_000);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = EngineConfig::from_json_str(r#"{"pool": {"pool_count": 0}}"#).unwrap_err();
        assert!(err.contains("pool_count"));
    }

    #[test]
    fn test_debug_hides_handler_body() {
        let opts = PoolOptions::new().with_panic_handler(std::sync::Arc::new(|_| {}));
        let rendered = format!("{opts:?}");
        assert!(rendered.contains("panic_handler: true"));
    }
}
