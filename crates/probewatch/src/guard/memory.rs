use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::LockStore;
use crate::clock::Clock;

/// Process-local lock store.
///
/// Visible to every caller holding the same instance; use [`super::SqlLockStore`]
/// when callers live in different processes.
#[derive(Debug)]
pub struct MemoryLockStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, entries: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| anyhow!("Lock TTL out of range: {}", e))?;
        let now = self.clock.now();

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(expires_at) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).is_some_and(|expires_at| *expires_at > now))
    }
}
