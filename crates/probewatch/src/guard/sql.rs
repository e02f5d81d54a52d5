use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use libsql::params;
use tracing::debug;

use super::LockStore;
use crate::clock::Clock;
use crate::pool::LibsqlPool;

/// Lock store kept in the `run_locks` table of the shared database, so every
/// process pointed at the same file sees the same locks.
///
/// Expiry is stored in unix milliseconds. Acquisition is a single upsert that
/// only overwrites an expired row, which SQLite serialises for us.
pub struct SqlLockStore {
    pool: LibsqlPool,
    clock: Arc<dyn Clock>,
    holder: String,
}

impl SqlLockStore {
    pub fn new(pool: LibsqlPool, clock: Arc<dyn Clock>) -> Self {
        let holder = format!("pid-{}", std::process::id());
        Self { pool, clock, holder }
    }

    /// Override the holder tag recorded alongside each lock
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::LibsqlManager>> {
        Ok(self.pool.get().await?)
    }

    /// Holder tag of the unexpired lock on `key`, if any
    pub async fn holder_of(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now().timestamp_millis();
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT holder FROM run_locks WHERE lock_key = ? AND expires_at > ?",
                params![key, now],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LockStore for SqlLockStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = i64::try_from(ttl.as_millis()).map_err(|_| anyhow!("Lock TTL out of range"))?;
        let now = self.clock.now().timestamp_millis();
        let conn = self.get_conn().await?;

        let changed = conn
            .execute(
                "INSERT INTO run_locks (lock_key, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(lock_key) DO UPDATE SET
                    holder = excluded.holder,
                    acquired_at = excluded.acquired_at,
                    expires_at = excluded.expires_at
                 WHERE run_locks.expires_at <= ?3",
                params![key, self.holder.clone(), now, now + ttl_ms],
            )
            .await?;

        if changed == 0 {
            match self.holder_of(key).await {
                Ok(Some(holder)) => debug!(lock_key = key, %holder, "Lock refused, held elsewhere"),
                Ok(None) => debug!(lock_key = key, "Lock refused, holder already gone"),
                Err(e) => debug!(lock_key = key, error = %e, "Lock refused, holder unknown"),
            }
        }
        Ok(changed == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM run_locks WHERE lock_key = ?", params![key]).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now().timestamp_millis();
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT 1 FROM run_locks WHERE lock_key = ? AND expires_at > ?",
                params![key, now],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}
