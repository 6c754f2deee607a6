//! Temporary access ledger.
//!
//! A persisted map from domain to the epoch millisecond at which its grant
//! expires.  Expiry is lazy: an entry is only deleted when a check observes
//! that it has lapsed, so stale entries may sit in storage until the next
//! lookup for that domain.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::store::{read_typed, write_typed, SettingsStore, StoreError, TEMPORARY_ACCESS_KEY};
use crate::util::{Clock, MINUTE_MS};

/// Default grant duration: ten minutes.
pub const DEFAULT_GRANT_MS: i64 = 10 * MINUTE_MS;

/// A point-in-time copy of the ledger, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    grants: BTreeMap<String, i64>,
}

impl LedgerSnapshot {
    pub fn new(grants: BTreeMap<String, i64>) -> Self {
        Self { grants }
    }

    pub fn expires_at(&self, domain: &str) -> Option<i64> {
        self.grants.get(domain).copied()
    }

    /// A grant is live up to and including its expiry instant.
    pub fn is_live(&self, domain: &str, now_ms: i64) -> bool {
        matches!(self.expires_at(domain), Some(expires) if now_ms <= expires)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl FromIterator<(String, i64)> for LedgerSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone)]
pub struct TemporaryAccessLedger {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    grant_ms: i64,
}

impl TemporaryAccessLedger {
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_grant_duration(settings, clock, DEFAULT_GRANT_MS)
    }

    pub fn with_grant_duration(
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        grant_ms: i64,
    ) -> Self {
        Self {
            settings,
            clock,
            grant_ms,
        }
    }

    pub fn grant_duration_ms(&self) -> i64 {
        self.grant_ms
    }

    async fn load(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        Ok(
            read_typed::<BTreeMap<String, i64>>(self.settings.as_ref(), TEMPORARY_ACCESS_KEY)
                .await?
                .unwrap_or_default(),
        )
    }

    async fn store(&self, grants: &BTreeMap<String, i64>) -> Result<(), StoreError> {
        write_typed(self.settings.as_ref(), TEMPORARY_ACCESS_KEY, grants).await
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(LedgerSnapshot::new(self.load().await?))
    }

    /// Whether `domain` currently holds a live grant.  An expired grant is
    /// deleted and the map written back before returning `false`.
    pub async fn has_valid_access(&self, domain: &str) -> Result<bool, StoreError> {
        let mut grants = self.load().await?;
        let Some(expires_at) = grants.get(domain).copied() else {
            return Ok(false);
        };
        let now = self.clock.now_ms();
        if now > expires_at {
            grants.remove(domain);
            self.store(&grants).await?;
            tracing::debug!(domain, expires_at_ms = expires_at, now_ms = now, "expired grant removed");
            return Ok(false);
        }
        Ok(true)
    }

    /// Grants access for the configured duration and returns the expiry.
    pub async fn grant(&self, domain: &str) -> Result<i64, StoreError> {
        self.grant_for(domain, self.grant_ms).await
    }

    /// Grants access for `duration_ms`, overwriting any earlier grant.
    pub async fn grant_for(&self, domain: &str, duration_ms: i64) -> Result<i64, StoreError> {
        let mut grants = self.load().await?;
        let expires_at = self.clock.now_ms() + duration_ms;
        grants.insert(domain.to_string(), expires_at);
        self.store(&grants).await?;
        tracing::info!(domain, expires_at_ms = expires_at, "temporary access granted");
        Ok(expires_at)
    }

    /// Drops every expired grant in a single write.  Not part of the
    /// decision path; only the optional background sweep calls this.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let mut grants = self.load().await?;
        let now = self.clock.now_ms();
        let before = grants.len();
        grants.retain(|_, expires_at| now <= *expires_at);
        let removed = before - grants.len();
        if removed > 0 {
            self.store(&grants).await?;
            tracing::debug!(removed, "swept expired grants");
        }
        Ok(removed)
    }
}
