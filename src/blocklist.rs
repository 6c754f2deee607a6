//! Blocklist resolution.
//!
//! The effective blocklist is the injected default list followed by the
//! user's custom entries.  Matching is a plain substring test against the
//! full URL so an entry may name a bare domain or a specific page.  The
//! price is that `x.com` also matches `example-x.com`; that is accepted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::extract_domain;
use crate::store::{read_typed, write_typed, SettingsStore, StoreError, CUSTOM_BLOCKED_URLS_KEY};
use crate::util::ac_for;

/// Sites blocked out of the box.
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "youtube.com",
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "reddit.com",
    "gupy.io",
    "linkedin.com",
];

pub fn default_blocklist() -> Vec<String> {
    DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()).collect()
}

/// How user input is turned into a custom entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// Reduce the input to its registrable domain.
    #[default]
    Domain,
    /// Store the trimmed input verbatim.
    Url,
}

#[derive(Debug, thiserror::Error)]
pub enum BlocklistError {
    #[error("entry is empty")]
    EmptyEntry,
    #[error("could not extract a domain from '{0}'")]
    InvalidDomain(String),
    #[error("'{0}' is already blocked")]
    DuplicateEntry(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// True if any entry occurs as a substring of `url`.
pub fn is_blocked(url: &str, entries: &[String]) -> bool {
    if entries.is_empty() {
        return false;
    }
    match ac_for(entries) {
        Some(ac) => ac.is_match(url),
        None => entries.iter().any(|e| url.contains(e.as_str())),
    }
}

/// The first entry, in list order, that occurs in `url`.
pub fn matching_entry<'a>(url: &str, entries: &'a [String]) -> Option<&'a str> {
    if entries.is_empty() {
        return None;
    }
    let first = match ac_for(entries) {
        Some(ac) => ac
            .find_overlapping_iter(url)
            .map(|m| m.pattern().as_usize())
            .min(),
        None => entries.iter().position(|e| url.contains(e.as_str())),
    };
    first.map(|idx| entries[idx].as_str())
}

/// Combines the immutable defaults with the persisted custom list.
#[derive(Clone)]
pub struct BlocklistResolver {
    defaults: Arc<Vec<String>>,
    settings: Arc<dyn SettingsStore>,
}

impl BlocklistResolver {
    pub fn new(defaults: Vec<String>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            defaults: Arc::new(defaults),
            settings,
        }
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    /// The persisted custom entries, in insertion order.
    pub async fn custom_entries(&self) -> Result<Vec<String>, StoreError> {
        Ok(
            read_typed::<Vec<String>>(self.settings.as_ref(), CUSTOM_BLOCKED_URLS_KEY)
                .await?
                .unwrap_or_default(),
        )
    }

    /// Defaults first, then custom entries.  If the custom list cannot be
    /// read it is treated as empty.
    pub async fn all_entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.defaults.as_ref().clone();
        match self.custom_entries().await {
            Ok(custom) => entries.extend(custom),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read custom blocklist, using defaults only");
            }
        }
        entries
    }

    /// Adds a custom entry and returns the string actually stored.
    pub async fn add_custom_entry(&self, raw: &str, mode: BlockMode) -> Result<String, BlocklistError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BlocklistError::EmptyEntry);
        }
        let entry = match mode {
            BlockMode::Domain => {
                let candidate = if trimmed.contains("://") {
                    trimmed.to_string()
                } else {
                    format!("https://{}", trimmed)
                };
                let domain = extract_domain(&candidate);
                if domain.is_empty() {
                    return Err(BlocklistError::InvalidDomain(trimmed.to_string()));
                }
                domain
            }
            BlockMode::Url => trimmed.to_string(),
        };

        let mut custom = self.custom_entries().await?;
        if custom.iter().any(|e| *e == entry) {
            return Err(BlocklistError::DuplicateEntry(entry));
        }
        custom.push(entry.clone());
        write_typed(self.settings.as_ref(), CUSTOM_BLOCKED_URLS_KEY, &custom).await?;
        tracing::info!(entry = %entry, ?mode, "custom blocklist entry added");
        Ok(entry)
    }

    /// Removes an exact match from the custom list.  Defaults are never
    /// touched; returns whether anything was removed.
    pub async fn remove_custom_entry(&self, entry: &str) -> Result<bool, StoreError> {
        let mut custom = self.custom_entries().await?;
        let before = custom.len();
        custom.retain(|e| e != entry);
        if custom.len() == before {
            if self.defaults.iter().any(|d| d == entry) {
                tracing::debug!(entry, "default entries cannot be removed");
            }
            return Ok(false);
        }
        write_typed(self.settings.as_ref(), CUSTOM_BLOCKED_URLS_KEY, &custom).await?;
        tracing::info!(entry, "custom blocklist entry removed");
        Ok(true)
    }
}
