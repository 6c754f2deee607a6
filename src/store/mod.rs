//! Persistence seams for Flocus.
//!
//! The decision core never talks to a storage engine directly.  It goes
//! through two traits: [`SettingsStore`], a key/value area holding the
//! custom blocklist and the temporary access ledger, and [`HistoryStore`],
//! an append-mostly log of granted accesses.  Both come in an in-memory
//! flavour (tests, ephemeral runs) and a file-backed flavour.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub mod file;
pub mod memory;

pub use self::file::{JsonFileSettingsStore, JsonlHistoryStore};
pub use self::memory::{MemoryHistoryStore, MemorySettingsStore};

/// Settings key holding the user managed blocklist (`string[]`).
pub const CUSTOM_BLOCKED_URLS_KEY: &str = "customBlockedUrls";

/// Settings key holding the ledger (`Record<domain, epochMs>`).
pub const TEMPORARY_ACCESS_KEY: &str = "temporaryAccess";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data could not be encoded or decoded: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value settings area.  Values are plain JSON so the persisted layout
/// stays readable by the extension itself.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Reads `key` and decodes it as `T`.  A value of the wrong shape is logged
/// and reported as absent so callers fall back to an empty collection.
pub async fn read_typed<T: DeserializeOwned>(
    store: &dyn SettingsStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value::<T>(raw) {
        Ok(v) => Ok(Some(v)),
        Err(err) => {
            tracing::warn!(key, error = %err, "persisted value has unexpected shape, ignoring");
            Ok(None)
        }
    }
}

/// Encodes `value` and writes it under `key`.
pub async fn write_typed<T: Serialize>(
    store: &dyn SettingsStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?).await
}

/// One successful access grant, kept for auditing and rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessHistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub domain: String,
    pub reason: String,
    /// When access was granted (epoch ms).
    pub timestamp: i64,
    /// When the grant expires (epoch ms).
    pub expiration_time: i64,
    pub was_content_creation: bool,
}

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends an entry and returns the id assigned to it.
    async fn add_entry(&self, entry: AccessHistoryEntry) -> Result<u64, StoreError>;
    async fn entries_by_domain(&self, domain: &str)
        -> Result<Vec<AccessHistoryEntry>, StoreError>;
    /// Most recent entries first.
    async fn recent_entries(&self, limit: usize) -> Result<Vec<AccessHistoryEntry>, StoreError>;
    /// Deletes entries older than `days_to_keep` days relative to `now_ms`
    /// and returns how many were removed.
    async fn clear_old_entries(&self, days_to_keep: u32, now_ms: i64)
        -> Result<usize, StoreError>;
    async fn clear_all(&self) -> Result<(), StoreError>;
}

pub(crate) fn retention_cutoff(days_to_keep: u32, now_ms: i64) -> i64 {
    now_ms - i64::from(days_to_keep) * crate::util::DAY_MS
}

/// Sorts newest first and truncates to `limit`.
pub(crate) fn newest_first(mut entries: Vec<AccessHistoryEntry>, limit: usize) -> Vec<AccessHistoryEntry> {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    entries.truncate(limit);
    entries
}
