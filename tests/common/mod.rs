#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flocus::{
    build_interceptor, BlockPage, ManualClock, MemoryHistoryStore, MemorySettingsStore,
    NavigationInterceptor, PolicyConfig, TabId, TabNavigator, MINUTE_MS,
};

/// Fixed starting instant for simulated clocks (2024-01-01T00:00:00Z).
pub const T0: i64 = 1_704_067_200_000;

pub const ORIGIN: &str = "chrome-extension://flocus-test";

/// An interceptor wired to in-memory stores and a manual clock, with
/// handles to all three so tests can poke at them.
pub struct Harness {
    pub interceptor: Arc<NavigationInterceptor>,
    pub settings: Arc<MemorySettingsStore>,
    pub history: Arc<MemoryHistoryStore>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_defaults(&["youtube.com", "facebook.com", "reddit.com"])
    }

    pub fn with_defaults(defaults: &[&str]) -> Self {
        let policy = PolicyConfig {
            default_blocklist: defaults.iter().map(|s| s.to_string()).collect(),
            extension_origin: ORIGIN.to_string(),
            ..PolicyConfig::default()
        };
        let settings = Arc::new(MemorySettingsStore::new());
        let history = Arc::new(MemoryHistoryStore::new());
        let clock = ManualClock::new(T0);
        let interceptor = build_interceptor(
            &policy,
            settings.clone(),
            history.clone(),
            Arc::new(clock.clone()),
            10 * MINUTE_MS,
            60 * MINUTE_MS,
        );
        Self {
            interceptor: Arc::new(interceptor),
            settings,
            history,
            clock,
        }
    }

    pub fn block_page(&self) -> BlockPage {
        BlockPage::new(ORIGIN)
    }
}

/// Records every redirect instead of driving a browser.
#[derive(Default)]
pub struct RecordingNavigator {
    pub redirects: Mutex<Vec<(TabId, String)>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> Vec<(TabId, String)> {
        self.redirects.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TabNavigator for RecordingNavigator {
    async fn redirect(&self, tab_id: TabId, url: &str) -> anyhow::Result<()> {
        self.redirects.lock().unwrap().push((tab_id, url.to_string()));
        Ok(())
    }
}

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
