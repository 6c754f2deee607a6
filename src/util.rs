//! Utility helpers for Flocus.
//!
//! This module exposes the clock abstraction used by every time-dependent
//! component and the shared Aho–Corasick matcher cache used for blocklist
//! and keyword scanning.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Milliseconds in one minute.
pub const MINUTE_MS: i64 = 60 * 1000;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

/// Source of "now" as Unix epoch milliseconds.  Every component that
/// compares timestamps takes a clock instead of reading the system time
/// directly so expiry and cool-down windows can be simulated.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.  Cloning shares the underlying
/// instant, so a test can keep a handle while the components under test
/// hold another.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance_ms(minutes * MINUTE_MS);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A memoising wrapper around `AhoCorasick` construction to avoid
/// recompiling automata for repeated lists.  The cache key is a hash of the
/// pattern list plus the case mode.
static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Given a list of literal patterns, return a shared exact-match
/// `AhoCorasick` matcher.  Pattern ids follow list order.
pub fn ac_for(list: &[String]) -> Option<Arc<AhoCorasick>> {
    cached(list, false)
}

/// Like [`ac_for`] but matching ASCII case-insensitively.  Callers are
/// expected to lower-case non-ASCII text themselves.
pub fn ac_for_ci(list: &[String]) -> Option<Arc<AhoCorasick>> {
    cached(list, true)
}

fn cached(list: &[String], case_insensitive: bool) -> Option<Arc<AhoCorasick>> {
    let mut hasher = AHasher::default();
    case_insensitive.hash(&mut hasher);
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return Some(existing.clone());
    }
    let ac = match AhoCorasickBuilder::new()
        .ascii_case_insensitive(case_insensitive)
        .build(list)
    {
        Ok(ac) => ac,
        Err(err) => {
            tracing::warn!(patterns = list.len(), error = %err, "failed to build matcher");
            return None;
        }
    };
    let arc = Arc::new(ac);
    AC_CACHE.insert(key, arc.clone());
    Some(arc)
}
