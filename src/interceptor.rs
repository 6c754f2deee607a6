//! Navigation interception and the access request flow.
//!
//! [`decide`] is the pure core: given a URL, the effective blocklist, a
//! ledger snapshot and the current time it says whether to let the
//! navigation through or where to redirect it.  [`NavigationInterceptor`]
//! wraps it with the reads, writes and side effects a browser host needs,
//! and tracks each tab through `Unchecked -> Allowed | Blocked ->
//! ReasonPending -> Allowed`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::blocklist::{matching_entry, BlocklistResolver};
use crate::block_page::BlockPage;
use crate::domain::extract_domain;
use crate::ledger::{LedgerSnapshot, TemporaryAccessLedger};
use crate::reason::{ReasonValidator, ReasonVerdict};
use crate::store::{AccessHistoryEntry, HistoryStore, StoreError};
use crate::util::{Clock, MINUTE_MS};

/// Window during which a domain cannot be unlocked again.
pub const DEFAULT_COOLDOWN_MS: i64 = 60 * MINUTE_MS;

pub type TabId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum Decision {
    Allow,
    #[serde(rename_all = "camelCase")]
    Redirect {
        domain: String,
        matched_entry: String,
        #[serde(rename = "url")]
        block_page_url: String,
    },
}

impl Decision {
    pub fn is_redirect(&self) -> bool {
        matches!(self, Decision::Redirect { .. })
    }
}

/// Decides what happens to a navigation to `url`.
pub fn decide(
    url: &str,
    entries: &[String],
    snapshot: &LedgerSnapshot,
    now_ms: i64,
    block_page: &BlockPage,
) -> Decision {
    // The block page URL embeds the original URL, which still contains the
    // blocked entry; never intercept it.
    if block_page.is_block_page(url) {
        return Decision::Allow;
    }
    let Some(entry) = matching_entry(url, entries) else {
        return Decision::Allow;
    };
    let domain = extract_domain(url);
    if !domain.is_empty() && snapshot.is_live(&domain, now_ms) {
        return Decision::Allow;
    }
    Decision::Redirect {
        matched_entry: entry.to_string(),
        block_page_url: block_page.url_for(url),
        domain,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationState {
    Unchecked,
    Allowed,
    Blocked,
    ReasonPending,
}

/// A tab-updated event as delivered by the browser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    pub tab_id: TabId,
    /// The URL reported in the change info, if the URL changed.
    #[serde(default)]
    pub url: Option<String>,
    /// The tab's current URL.
    #[serde(default)]
    pub tab_url: Option<String>,
}

impl TabUpdate {
    pub fn effective_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.tab_url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

/// Performs the redirect side effect in the host browser.
#[async_trait::async_trait]
pub trait TabNavigator: Send + Sync {
    async fn redirect(&self, tab_id: TabId, url: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    #[serde(default)]
    pub tab_id: Option<TabId>,
    pub requested_url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub domain: String,
    pub expires_at_ms: i64,
    pub redirect_url: String,
    pub was_content_creation: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("could not determine the domain of '{0}'")]
    InvalidUrl(String),
    #[error("access to {domain} was granted recently; try again in {retry_after_ms} ms")]
    RateLimited { domain: String, retry_after_ms: i64 },
    #[error("reason rejected: {}", .0.message())]
    InvalidReason(ReasonVerdict),
    #[error("grant could not be saved: {0}")]
    Persistence(#[source] StoreError),
}

pub struct NavigationInterceptor {
    resolver: BlocklistResolver,
    ledger: TemporaryAccessLedger,
    history: Arc<dyn HistoryStore>,
    validator: ReasonValidator,
    block_page: BlockPage,
    clock: Arc<dyn Clock>,
    cooldown_ms: i64,
    tabs: Mutex<HashMap<TabId, NavigationState>>,
}

impl NavigationInterceptor {
    pub fn new(
        resolver: BlocklistResolver,
        ledger: TemporaryAccessLedger,
        history: Arc<dyn HistoryStore>,
        validator: ReasonValidator,
        block_page: BlockPage,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            ledger,
            history,
            validator,
            block_page,
            clock,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            tabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    pub fn resolver(&self) -> &BlocklistResolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &TemporaryAccessLedger {
        &self.ledger
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn validator(&self) -> &ReasonValidator {
        &self.validator
    }

    pub fn block_page(&self) -> &BlockPage {
        &self.block_page
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Decides a navigation without side effects on any tab.  Failing to
    /// read the ledger lets the navigation through.
    pub async fn evaluate(&self, url: &str) -> Decision {
        let entries = self.resolver.all_entries().await;
        let snapshot = match self.ledger.snapshot().await {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(url, error = %err, "ledger unavailable, allowing navigation");
                return Decision::Allow;
            }
        };
        let now = self.clock.now_ms();
        let decision = decide(url, &entries, &snapshot, now, &self.block_page);
        if let Decision::Redirect { domain, .. } = &decision {
            if snapshot.expires_at(domain).is_some() {
                // Stale grant observed: let the ledger drop it.
                if let Err(err) = self.ledger.has_valid_access(domain).await {
                    tracing::warn!(domain = %domain, error = %err, "failed to evict expired grant");
                }
            }
        }
        decision
    }

    /// Handles a tab-updated event: decides, records the tab state and
    /// redirects the tab when blocked.
    pub async fn on_tab_updated(&self, update: &TabUpdate, navigator: &dyn TabNavigator) -> Decision {
        let Some(url) = update.effective_url() else {
            tracing::debug!(tab_id = update.tab_id, "tab updated without url");
            return Decision::Allow;
        };
        if self.block_page.is_block_page(url) {
            return Decision::Allow;
        }
        let decision = self.evaluate(url).await;
        match &decision {
            Decision::Allow => self.set_tab_state(update.tab_id, NavigationState::Allowed),
            Decision::Redirect {
                domain,
                matched_entry,
                block_page_url,
            } => {
                self.set_tab_state(update.tab_id, NavigationState::Blocked);
                tracing::info!(tab_id = update.tab_id, domain = %domain, entry = %matched_entry, "navigation blocked");
                if let Err(err) = navigator.redirect(update.tab_id, block_page_url).await {
                    tracing::warn!(tab_id = update.tab_id, error = %err, "failed to redirect tab");
                }
            }
        }
        decision
    }

    /// The user opened the reason form on a blocked tab.
    pub fn open_reason_form(&self, tab_id: TabId) -> bool {
        let mut tabs = self.lock_tabs();
        match tabs.get(&tab_id) {
            Some(NavigationState::Blocked) | Some(NavigationState::ReasonPending) => {
                tabs.insert(tab_id, NavigationState::ReasonPending);
                true
            }
            _ => false,
        }
    }

    pub fn tab_state(&self, tab_id: TabId) -> NavigationState {
        self.lock_tabs()
            .get(&tab_id)
            .copied()
            .unwrap_or(NavigationState::Unchecked)
    }

    /// Forgets a closed tab.  Returns whether the tab was tracked.
    pub fn forget_tab(&self, tab_id: TabId) -> bool {
        self.lock_tabs().remove(&tab_id).is_some()
    }

    /// Number of tabs currently tracked.
    pub fn tracked_tabs(&self) -> usize {
        self.lock_tabs().len()
    }

    /// Handles a reason submitted from the block page.
    pub async fn request_access(&self, request: &AccessRequest) -> Result<AccessGrant, AccessError> {
        let result = self.try_grant(request).await;
        if let Some(tab_id) = request.tab_id {
            let state = if result.is_ok() {
                NavigationState::Allowed
            } else {
                NavigationState::Blocked
            };
            self.set_tab_state(tab_id, state);
        }
        result
    }

    async fn try_grant(&self, request: &AccessRequest) -> Result<AccessGrant, AccessError> {
        let requested_url = request.requested_url.trim();
        let domain = extract_domain(requested_url);
        if domain.is_empty() {
            return Err(AccessError::InvalidUrl(requested_url.to_string()));
        }
        let now = self.clock.now_ms();

        if let Some(last) = self.last_grant_within_cooldown(&domain, now).await {
            let retry_after_ms = last + self.cooldown_ms - now;
            tracing::info!(domain = %domain, retry_after_ms, "access refused: cool-down active");
            return Err(AccessError::RateLimited {
                domain,
                retry_after_ms,
            });
        }

        let reason = request.reason.trim();
        let verdict = self.validator.verdict(reason);
        let ReasonVerdict::Accepted { content_creation } = verdict else {
            tracing::info!(domain = %domain, rule = verdict.code(), "access refused: reason rejected");
            return Err(AccessError::InvalidReason(verdict));
        };

        let expires_at_ms = self.ledger.grant(&domain).await.map_err(|err| {
            tracing::error!(domain = %domain, error = %err, "failed to persist grant");
            AccessError::Persistence(err)
        })?;

        let entry = AccessHistoryEntry {
            id: None,
            domain: domain.clone(),
            reason: reason.to_string(),
            timestamp: now,
            expiration_time: expires_at_ms,
            was_content_creation: content_creation,
        };
        if let Err(err) = self.history.add_entry(entry).await {
            tracing::warn!(domain = %domain, error = %err, "failed to record access history");
        }

        Ok(AccessGrant {
            domain,
            expires_at_ms,
            redirect_url: requested_url.to_string(),
            was_content_creation: content_creation,
        })
    }

    /// Timestamp of the latest grant for `domain` inside the cool-down
    /// window.  Unreadable history counts as no history.
    async fn last_grant_within_cooldown(&self, domain: &str, now: i64) -> Option<i64> {
        let entries = match self.history.entries_by_domain(domain).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(domain, error = %err, "history unavailable, skipping cool-down check");
                return None;
            }
        };
        let window_start = now - self.cooldown_ms;
        entries
            .iter()
            .map(|e| e.timestamp)
            .filter(|ts| *ts > window_start)
            .max()
    }

    fn set_tab_state(&self, tab_id: TabId, state: NavigationState) {
        self.lock_tabs().insert(tab_id, state);
    }

    fn lock_tabs(&self) -> std::sync::MutexGuard<'_, HashMap<TabId, NavigationState>> {
        // A poisoned map only holds plain enum values; keep using it.
        self.tabs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
