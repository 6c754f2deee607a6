use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    newest_first, retention_cutoff, AccessHistoryEntry, HistoryStore, SettingsStore, StoreError,
};

/// Settings kept in process memory.  `set_failing(true)` makes every call
/// return `StoreError::Unavailable`, which is how tests exercise the
/// fail-open and fail-closed paths.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
    failing: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("settings store offline".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct HistoryInner {
    next_id: u64,
    entries: Vec<AccessHistoryEntry>,
}

/// Access history kept in process memory.
#[derive(Default)]
pub struct MemoryHistoryStore {
    inner: RwLock<HistoryInner>,
    failing: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("history store offline".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn add_entry(&self, mut entry: AccessHistoryEntry) -> Result<u64, StoreError> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        entry.id = Some(id);
        inner.entries.push(entry);
        Ok(id)
    }

    async fn entries_by_domain(&self, domain: &str) -> Result<Vec<AccessHistoryEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<AccessHistoryEntry>, StoreError> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(newest_first(inner.entries.clone(), limit))
    }

    async fn clear_old_entries(&self, days_to_keep: u32, now_ms: i64) -> Result<usize, StoreError> {
        self.check()?;
        let cutoff = retention_cutoff(days_to_keep, now_ms);
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|e| e.timestamp > cutoff);
        Ok(before - inner.entries.len())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.write().await.entries.clear();
        Ok(())
    }
}
