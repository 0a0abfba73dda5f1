//! Keyed mutual exclusion for market mutations
//!
//! Every reserve-mutating operation on a market acquires this lock first and
//! holds it until the operation finishes. Acquisition is bounded: a fixed
//! number of `try_lock` attempts under exponential backoff, then
//! `LockUnavailable`. Handles release on drop, so error paths cannot leak a
//! held lock.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::error::{CoreError, Result};

/// Retry tuning for lock acquisition
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Hard ceiling on total time spent retrying before giving up
    pub max_elapsed: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(250),
            max_elapsed: Duration::from_secs(2),
        }
    }
}

/// Exclusive hold on a single key, released when dropped
pub struct LockHandle {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Mutual-exclusion provider scoped to logical keys.
///
/// The in-memory implementation below covers a single process; distributed
/// deployments implement the same trait over shared durable state. There is
/// exactly one strategy per provider instance.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire the lock for `key`, failing fast with `LockUnavailable` once
    /// the bounded retries are exhausted.
    async fn acquire(&self, key: &str) -> Result<LockHandle>;

    /// Explicit release for call sites that want the hand-off visible;
    /// dropping the handle is equivalent.
    fn release(&self, handle: LockHandle) {
        drop(handle);
    }
}

/// Process-local lock provider over per-key async mutexes
pub struct InMemoryLockProvider {
    config: LockConfig,
    cells: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryLockProvider {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            cells: DashMap::new(),
        }
    }

    fn cell_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

impl Default for InMemoryLockProvider {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn acquire(&self, key: &str) -> Result<LockHandle> {
        let cell = self.cell_for(key);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_interval(self.config.max_interval)
            .with_max_elapsed_time(Some(self.config.max_elapsed))
            .build();

        loop {
            match cell.clone().try_lock_owned() {
                Ok(guard) => {
                    return Ok(LockHandle {
                        key: key.to_string(),
                        _guard: guard,
                    })
                }
                Err(_) => match backoff.next_backoff() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        warn!(key = %key, "lock acquisition retries exhausted");
                        return Err(CoreError::LockUnavailable {
                            key: key.to_string(),
                        });
                    }
                },
            }
        }
    }
}
