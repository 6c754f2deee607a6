//! Core library for Flocus.  This module wires the decision core (blocklist,
//! temporary access ledger, reason validation, navigation interception) to
//! its stores and exposes the local HTTP bridge the browser extension's
//! background script calls.

pub mod block_page;
pub mod blocklist;
mod config;
pub mod domain;
pub mod interceptor;
pub mod ledger;
pub mod reason;
pub mod store;
pub mod util;

pub use config::{AppConfig, PolicyConfig, MAX_WINDOW_MINUTES};

use axum::extract::rejection::{BytesRejection, FailedToBufferBody, JsonRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub use crate::block_page::{BlockPage, BlockPageView};
pub use crate::blocklist::{is_blocked, BlockMode, BlocklistError, BlocklistResolver};
pub use crate::domain::extract_domain;
pub use crate::interceptor::{
    decide, AccessError, AccessGrant, AccessRequest, Decision, NavigationInterceptor,
    NavigationState, TabId, TabNavigator, TabUpdate,
};
pub use crate::ledger::{LedgerSnapshot, TemporaryAccessLedger};
pub use crate::reason::{ReasonValidator, ReasonVerdict};
pub use crate::store::{
    AccessHistoryEntry, HistoryStore, JsonFileSettingsStore, JsonlHistoryStore,
    MemoryHistoryStore, MemorySettingsStore, SettingsStore, StoreError,
};
pub use crate::util::{Clock, ManualClock, SystemClock, MINUTE_MS};

const SETTINGS_FILE: &str = "settings.json";
const HISTORY_FILE: &str = "history.jsonl";
const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<serde_json::Value>,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub interceptor: Arc<NavigationInterceptor>,
    pub allowed_tokens: Option<HashSet<String>>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub sweep_interval_secs: Option<u64>,
    pub history_retention_days: Option<u32>,
}

/// Assembles the decision core from already constructed stores.
pub fn build_interceptor(
    policy: &PolicyConfig,
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    grant_ms: i64,
    cooldown_ms: i64,
) -> NavigationInterceptor {
    let resolver = BlocklistResolver::new(policy.default_blocklist.clone(), settings.clone());
    let ledger = TemporaryAccessLedger::with_grant_duration(settings, clock.clone(), grant_ms);
    let validator = ReasonValidator::new(policy.content_creation_keywords.clone());
    let block_page = BlockPage::new(&policy.extension_origin);
    NavigationInterceptor::new(resolver, ledger, history, validator, block_page, clock)
        .with_cooldown_ms(cooldown_ms)
}

/// Build state from a parsed configuration.  Stores are file backed when
/// `state_dir` is set and in memory otherwise.
pub async fn build_state(config: AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<AppState> {
    use anyhow::Context;

    if config.grant_minutes == 0 {
        anyhow::bail!("FLOCUS_GRANT_MINUTES must be greater than zero");
    }
    let grant_ms = crate::config::window_ms("FLOCUS_GRANT_MINUTES", config.grant_minutes)?;
    let cooldown_ms = crate::config::window_ms("FLOCUS_COOLDOWN_MINUTES", config.cooldown_minutes)?;

    let (settings, history): (Arc<dyn SettingsStore>, Arc<dyn HistoryStore>) =
        match config.state_dir.as_ref() {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("Failed to create state directory '{}'", dir.display()))?;
                let settings = JsonFileSettingsStore::open(dir.join(SETTINGS_FILE))
                    .await
                    .with_context(|| format!("Failed to open settings in '{}'", dir.display()))?;
                let history = JsonlHistoryStore::open(dir.join(HISTORY_FILE))
                    .await
                    .with_context(|| format!("Failed to open history in '{}'", dir.display()))?;
                (Arc::new(settings), Arc::new(history))
            }
            None => {
                tracing::warn!("FLOCUS_STATE_DIR not set: grants and history are kept in memory only");
                (
                    Arc::new(MemorySettingsStore::new()),
                    Arc::new(MemoryHistoryStore::new()),
                )
            }
        };

    let interceptor = build_interceptor(
        &config.policy,
        settings,
        history,
        clock,
        grant_ms,
        cooldown_ms,
    );

    Ok(AppState {
        interceptor: Arc::new(interceptor),
        allowed_tokens: config.allowed_tokens,
        max_request_bytes: config.max_request_bytes,
        sweep_interval_secs: config.sweep_interval_secs,
        history_retention_days: config.history_retention_days,
    })
}

/// Build state from environment variables, see [`AppConfig::from_env`].
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    build_state(config, Arc::new(SystemClock)).await
}

/// One maintenance pass: drop expired grants and, when a retention period
/// is configured, old history entries.
pub async fn run_maintenance(state: &AppState) {
    let interceptor = &state.interceptor;
    match interceptor.ledger().sweep_expired().await {
        Ok(removed) if removed > 0 => tracing::info!(removed, "expired grants swept"),
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "grant sweep failed"),
    }
    if let Some(days) = state.history_retention_days {
        let now = interceptor.clock().now_ms();
        match interceptor.history().clear_old_entries(days, now).await {
            Ok(deleted) if deleted > 0 => tracing::info!(deleted, days, "old history pruned"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "history prune failed"),
        }
    }
}

/// Spawns the periodic maintenance task if an interval is configured.
pub fn spawn_maintenance(state: AppState) -> Option<tokio::task::JoinHandle<()>> {
    let secs = state.sweep_interval_secs?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_maintenance(&state).await;
        }
    }))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/navigation", post(navigation_handler))
        .route("/block-page", get(block_page_handler))
        .route("/block-page/open", post(open_reason_form_handler))
        .route("/access", post(access_handler))
        .route(
            "/blocklist",
            get(list_blocklist_handler)
                .post(add_blocklist_handler)
                .delete(remove_blocklist_handler),
        )
        .route("/history", get(history_handler).delete(clear_history_handler))
        .route("/history/prune", post(prune_history_handler))
        .route(
            "/tabs/:tab_id",
            get(tab_state_handler).delete(forget_tab_handler),
        )
        .route("/healthz", get(healthz_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn error(error_code: i32, status: StatusCode, message: impl Into<String>) -> ErrorResponse {
    ErrorResponse {
        error_code,
        message: message.into(),
        http_status: status.as_u16(),
        diagnostics: None,
    }
}

fn authorization_error() -> ErrorResponse {
    error(2001, StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn store_error(err: &StoreError) -> ErrorResponse {
    tracing::warn!(error = %err, "store request failed");
    error(5030, StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ErrorResponse> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(authorization_error)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(authorization_error());
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(authorization_error());
    }
    Ok(token.to_string())
}

/// Only enforced when an allowlist is configured.
fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), ErrorResponse> {
    let Some(tokens) = allowed_tokens else {
        return Ok(());
    };
    let token = extract_bearer_token(headers)?;
    if !tokens.contains(&token) {
        return Err(authorization_error());
    }
    Ok(())
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            let message = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            respond_with_error(error(4001, StatusCode::PAYLOAD_TOO_LARGE, message))
        }
        other => respond_with_error(error(4000, StatusCode::BAD_REQUEST, other.body_text())),
    }
}

/// The HTTP caller performs the redirect itself from the returned decision.
struct CallerNavigates;

#[async_trait::async_trait]
impl TabNavigator for CallerNavigates {
    async fn redirect(&self, tab_id: TabId, url: &str) -> anyhow::Result<()> {
        tracing::debug!(tab_id, url, "redirect delegated to caller");
        Ok(())
    }
}

/// Handler for `/navigation`: one tab-updated event in, one decision out.
async fn navigation_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TabUpdate>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let update = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    let decision = state
        .interceptor
        .on_tab_updated(&update, &CallerNavigates)
        .await;
    (StatusCode::OK, Json(decision)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockPageQuery {
    requested_url: Option<String>,
}

async fn block_page_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BlockPageQuery>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let Some(requested) = params
        .requested_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return respond_with_error(error(
            4002,
            StatusCode::BAD_REQUEST,
            "Missing requestedUrl",
        ));
    };
    let view = state.interceptor.block_page().view(requested);
    (StatusCode::OK, Json(view)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenReasonForm {
    tab_id: TabId,
}

async fn open_reason_form_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OpenReasonForm>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let body = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    let pending = state.interceptor.open_reason_form(body.tab_id);
    let json = serde_json::json!({
        "reasonPending": pending,
        "state": state.interceptor.tab_state(body.tab_id),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Handler for `/access`.  Maps policy refusals to distinct statuses so the
/// block page can show the matching message.
async fn access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    match state.interceptor.request_access(&request).await {
        Ok(grant) => (StatusCode::OK, Json(grant)).into_response(),
        Err(err) => respond_with_error(access_error_response(&err)),
    }
}

fn access_error_response(err: &AccessError) -> ErrorResponse {
    let message = err.to_string();
    match err {
        AccessError::InvalidUrl(_) => error(4003, StatusCode::BAD_REQUEST, message),
        AccessError::RateLimited {
            domain,
            retry_after_ms,
        } => ErrorResponse {
            diagnostics: Some(serde_json::json!({
                "domain": domain,
                "retryAfterMs": retry_after_ms,
            })),
            ..error(4290, StatusCode::TOO_MANY_REQUESTS, message)
        },
        AccessError::InvalidReason(verdict) => ErrorResponse {
            diagnostics: Some(serde_json::json!({ "rule": verdict.code() })),
            ..error(4220, StatusCode::UNPROCESSABLE_ENTITY, verdict.message())
        },
        AccessError::Persistence(_) => error(5031, StatusCode::SERVICE_UNAVAILABLE, message),
    }
}

async fn list_blocklist_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let resolver = state.interceptor.resolver();
    match resolver.custom_entries().await {
        Ok(custom) => {
            let json = serde_json::json!({
                "defaults": resolver.defaults(),
                "custom": custom,
            });
            (StatusCode::OK, Json(json)).into_response()
        }
        Err(err) => respond_with_error(store_error(&err)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddEntry {
    entry: String,
    #[serde(default)]
    mode: BlockMode,
}

async fn add_blocklist_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AddEntry>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let body = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    match state
        .interceptor
        .resolver()
        .add_custom_entry(&body.entry, body.mode)
        .await
    {
        Ok(entry) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "entry": entry })),
        )
            .into_response(),
        Err(BlocklistError::Store(err)) => respond_with_error(store_error(&err)),
        Err(err @ BlocklistError::DuplicateEntry(_)) => {
            respond_with_error(error(4090, StatusCode::CONFLICT, err.to_string()))
        }
        Err(err) => respond_with_error(error(4004, StatusCode::BAD_REQUEST, err.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct RemoveEntry {
    entry: String,
}

async fn remove_blocklist_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RemoveEntry>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let body = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    match state
        .interceptor
        .resolver()
        .remove_custom_entry(&body.entry)
        .await
    {
        Ok(removed) => (
            StatusCode::OK,
            Json(serde_json::json!({ "removed": removed })),
        )
            .into_response(),
        Err(err) => respond_with_error(store_error(&err)),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryQuery>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    match state.interceptor.history().recent_entries(limit).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => respond_with_error(store_error(&err)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PruneHistory {
    #[serde(default = "default_days_to_keep")]
    days_to_keep: u32,
}

fn default_days_to_keep() -> u32 {
    30
}

async fn prune_history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PruneHistory>, JsonRejection>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let body = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    let now = state.interceptor.clock().now_ms();
    match state
        .interceptor
        .history()
        .clear_old_entries(body.days_to_keep, now)
        .await
    {
        Ok(deleted) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": deleted })),
        )
            .into_response(),
        Err(err) => respond_with_error(store_error(&err)),
    }
}

async fn clear_history_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    match state.interceptor.history().clear_all().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => respond_with_error(store_error(&err)),
    }
}

async fn tab_state_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tab_id): Path<TabId>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let json = serde_json::json!({
        "tabId": tab_id,
        "state": state.interceptor.tab_state(tab_id),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Called on the browser's tab-removed event.
async fn forget_tab_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tab_id): Path<TabId>,
) -> axum::response::Response {
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }
    let forgotten = state.interceptor.forget_tab(tab_id);
    tracing::debug!(tab_id, forgotten, "tab removed");
    let json = serde_json::json!({ "forgotten": forgotten });
    (StatusCode::OK, Json(json)).into_response()
}

/// Simple health endpoint for liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "defaultEntries": state.interceptor.resolver().defaults().len(),
        "grantMinutes": state.interceptor.ledger().grant_duration_ms() / MINUTE_MS,
    });
    (StatusCode::OK, Json(json)).into_response()
}
