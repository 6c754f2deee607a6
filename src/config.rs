use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::blocklist::default_blocklist;
use crate::block_page::DEFAULT_EXTENSION_ORIGIN;
use crate::reason::DEFAULT_CONTENT_KEYWORDS;
use crate::util::MINUTE_MS;

/// Policy settings loaded from the optional `FLOCUS_CONFIG` JSON file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Entries blocked out of the box.  They can never be removed through
    /// the blocklist API.
    #[serde(default = "default_blocklist")]
    pub default_blocklist: Vec<String>,
    /// Vocabulary that marks a reason as content-creation work.
    #[serde(default = "default_keywords")]
    pub content_creation_keywords: Vec<String>,
    /// Origin the block page is served from.
    #[serde(default = "default_origin")]
    pub extension_origin: String,
}

fn default_keywords() -> Vec<String> {
    DEFAULT_CONTENT_KEYWORDS.iter().map(|s| s.to_string()).collect()
}

fn default_origin() -> String {
    DEFAULT_EXTENSION_ORIGIN.to_owned()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_blocklist: default_blocklist(),
            content_creation_keywords: default_keywords(),
            extension_origin: default_origin(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub policy: PolicyConfig,
    /// Directory holding `settings.json` and `history.jsonl`.  `None`
    /// keeps all state in memory.
    pub state_dir: Option<PathBuf>,
    pub grant_minutes: u64,
    pub cooldown_minutes: u64,
    pub sweep_interval_secs: Option<u64>,
    pub history_retention_days: Option<u32>,
    pub allowed_tokens: Option<HashSet<String>>,
    pub max_request_bytes: Option<usize>,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let policy = if let Ok(path) = env::var("FLOCUS_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!("Failed to read FLOCUS_CONFIG '{}': file unreadable", path)
            })?;
            serde_json::from_str::<PolicyConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse FLOCUS_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            PolicyConfig::default()
        };

        let state_dir = env::var("FLOCUS_STATE_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let allowed_tokens = env::var("FLOCUS_ALLOWED_TOKENS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let grant_minutes = parse_window_minutes("FLOCUS_GRANT_MINUTES")?.unwrap_or(10);
        if grant_minutes == 0 {
            return Err(anyhow!("FLOCUS_GRANT_MINUTES must be greater than zero"));
        }
        let cooldown_minutes = parse_window_minutes("FLOCUS_COOLDOWN_MINUTES")?.unwrap_or(60);
        let sweep_interval_secs =
            parse_optional_u64("FLOCUS_SWEEP_INTERVAL_SECS")?.filter(|n| *n > 0);
        let history_retention_days = parse_optional_u64("FLOCUS_HISTORY_RETENTION_DAYS")?
            .map(|d| u32::try_from(d).map_err(|_| anyhow!("FLOCUS_HISTORY_RETENTION_DAYS is too large")))
            .transpose()?;
        let max_request_bytes = parse_optional_u64("FLOCUS_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let port = parse_optional_u64("PORT")?
            .map(|p| u16::try_from(p).map_err(|_| anyhow!("PORT must be a valid port number")))
            .transpose()?
            .unwrap_or(8080);

        Ok(Self {
            policy,
            state_dir,
            grant_minutes,
            cooldown_minutes,
            sweep_interval_secs,
            history_retention_days,
            allowed_tokens,
            max_request_bytes,
            port,
        })
    }
}

/// Longest accepted grant or cool-down window: one year.
pub const MAX_WINDOW_MINUTES: u64 = 365 * 24 * 60;

/// Converts a window length to milliseconds, refusing anything above
/// [`MAX_WINDOW_MINUTES`].
pub fn window_ms(var: &str, minutes: u64) -> Result<i64> {
    i64::try_from(minutes)
        .ok()
        .filter(|m| *m as u64 <= MAX_WINDOW_MINUTES)
        .and_then(|m| m.checked_mul(MINUTE_MS))
        .ok_or_else(|| anyhow!("{} must be at most {} minutes", var, MAX_WINDOW_MINUTES))
}

fn parse_window_minutes(var: &str) -> Result<Option<u64>> {
    match parse_optional_u64(var)? {
        Some(minutes) if minutes > MAX_WINDOW_MINUTES => Err(anyhow!(
            "{} must be at most {} minutes",
            var,
            MAX_WINDOW_MINUTES
        )),
        other => Ok(other),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
