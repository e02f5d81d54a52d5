/// Run guard - time-boxed mutual exclusion per probe family
///
/// A cycle for a probe family may be triggered by any number of callers at
/// once. The guard lets exactly one of them through; the others see the lock
/// and skip. Lock entries carry a TTL so a runner that dies between acquire
/// and release only costs the cycles that fall inside the TTL window.
pub mod memory;
pub mod sql;

pub use memory::MemoryLockStore;
pub use sql::SqlLockStore;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, warn};

/// Key-value store with expiring entries, shared by every caller that may try
/// to start a cycle.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Store `key` unless an unexpired entry already exists.
    /// Returns true when this call stored the entry.
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether an unexpired entry exists for `key`
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Mutual-exclusion front end over a [`LockStore`].
///
/// Store errors are folded into the conservative answer: an acquire that
/// cannot reach the store is refused, and a lock that cannot be inspected is
/// reported as held. A skipped cycle is acceptable, two concurrent cycles are
/// not.
#[derive(Clone)]
pub struct RunGuard {
    store: Arc<dyn LockStore>,
}

impl RunGuard {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Take the lock for `key` for at most `ttl`
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> bool {
        match self.store.add(key, ttl).await {
            Ok(acquired) => {
                debug!(lock = key, acquired, "Run lock acquisition attempted");
                acquired
            }
            Err(e) => {
                warn!(lock = key, error = %e, "Lock store unavailable, refusing acquisition");
                false
            }
        }
    }

    /// Drop the lock for `key`; safe to call when nothing is held
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            error!(lock = key, error = %e, "Failed to release run lock, it will expire on its TTL");
        }
    }

    pub async fn is_held(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            warn!(lock = key, error = %e, "Lock store unavailable, treating lock as held");
            true
        })
    }

    /// Run `body` while holding the lock for `key`.
    ///
    /// Returns `None` without polling `body` when the lock is taken. The lock
    /// is released after `body` completes, fails, or panics; a panic is
    /// resumed once the lock is gone.
    pub async fn scoped<F, T>(&self, key: &str, ttl: Duration, body: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        if !self.try_acquire(key, ttl).await {
            return None;
        }

        let outcome = AssertUnwindSafe(body).catch_unwind().await;
        self.release(key).await;

        match outcome {
            Ok(value) => Some(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
