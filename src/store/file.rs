use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    newest_first, retention_cutoff, AccessHistoryEntry, HistoryStore, SettingsStore, StoreError,
};

/// Settings persisted as a single JSON object.  The whole document is kept
/// in memory and rewritten (temp file + rename) on every mutation.
pub struct JsonFileSettingsStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettingsStore {
    /// Opens the store at `path`, creating an empty document if the file
    /// does not exist yet.  A file that is not a JSON object is an error so
    /// that a damaged document is never silently overwritten.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => serde_json::from_str::<Map<String, Value>>(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "opened settings file");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        let previous = values.insert(key.to_string(), value);
        if let Err(err) = self.persist(&values).await {
            // Keep memory consistent with what is on disk.
            match previous {
                Some(prev) => values.insert(key.to_string(), prev),
                None => values.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&values).await {
            values.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

struct JsonlInner {
    next_id: u64,
    entries: Vec<AccessHistoryEntry>,
    /// The file does not end with a newline (torn tail from an earlier
    /// failed write), so the next append must start a fresh line.
    needs_newline: bool,
}

/// Access history persisted as newline-delimited JSON.  New entries are
/// appended; pruning rewrites the file.
pub struct JsonlHistoryStore {
    path: PathBuf,
    inner: Mutex<JsonlInner>,
}

impl JsonlHistoryStore {
    /// Opens (or creates lazily) the history file at `path`.  Lines that do
    /// not decode as entries are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AccessHistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(path = %path.display(), line = lineno + 1, error = %err, "skipping malformed history line");
                }
            }
        }
        let next_id = entries.iter().filter_map(|e| e.id).max().unwrap_or(0);
        let needs_newline = !content.is_empty() && !content.ends_with('\n');
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened history file");
        Ok(Self {
            path,
            inner: Mutex::new(JsonlInner {
                next_id,
                entries,
                needs_newline,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn rewrite(&self, entries: &[AccessHistoryEntry]) -> Result<(), StoreError> {
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for JsonlHistoryStore {
    async fn add_entry(&self, mut entry: AccessHistoryEntry) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id + 1;
        entry.id = Some(id);
        let mut line = String::new();
        if inner.needs_newline {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&entry)?);
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let len_before = file.metadata().await?.len();
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            // Cut the partial line off so later appends stay on their own line.
            if let Err(trunc_err) = file.set_len(len_before).await {
                tracing::warn!(path = %self.path.display(), error = %trunc_err, "failed to truncate torn history line");
                inner.needs_newline = true;
            }
            return Err(err.into());
        }
        inner.needs_newline = false;
        inner.next_id = id;
        inner.entries.push(entry);
        Ok(id)
    }

    async fn entries_by_domain(&self, domain: &str) -> Result<Vec<AccessHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<AccessHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(newest_first(inner.entries.clone(), limit))
    }

    async fn clear_old_entries(&self, days_to_keep: u32, now_ms: i64) -> Result<usize, StoreError> {
        let cutoff = retention_cutoff(days_to_keep, now_ms);
        let mut inner = self.inner.lock().await;
        let kept: Vec<AccessHistoryEntry> = inner
            .entries
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect();
        let deleted = inner.entries.len() - kept.len();
        if deleted == 0 {
            return Ok(0);
        }
        self.rewrite(&kept).await?;
        inner.entries = kept;
        inner.needs_newline = false;
        Ok(deleted)
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        self.rewrite(&[]).await?;
        inner.entries.clear();
        inner.needs_newline = false;
        Ok(())
    }
}
