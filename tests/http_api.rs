mod common;

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, T0};
use flocus::{app, AppState, HistoryStore, MINUTE_MS};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn state(h: &Harness) -> AppState {
    AppState {
        interceptor: h.interceptor.clone(),
        allowed_tokens: None,
        max_request_bytes: None,
        sweep_interval_secs: None,
        history_retention_days: None,
    }
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app(state).oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn navigation_returns_redirect_decision() {
    let h = Harness::new();
    let (status, body) = send(
        state(&h),
        post(
            "/navigation",
            json!({"tabId": 3, "url": "https://www.youtube.com/watch?v=1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "redirect");
    assert_eq!(body["domain"], "youtube.com");
    assert_eq!(body["matchedEntry"], "youtube.com");
    let url = body["url"].as_str().unwrap();
    assert_eq!(
        h.block_page().requested_url(url).as_deref(),
        Some("https://www.youtube.com/watch?v=1")
    );

    let (_, tab) = send(state(&h), get("/tabs/3")).await;
    assert_eq!(tab["state"], "blocked");
}

#[tokio::test]
async fn navigation_allows_unlisted_sites() {
    let h = Harness::new();
    let (status, body) = send(
        state(&h),
        post("/navigation", json!({"tabId": 1, "url": "https://crates.io/"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"action": "allow"}));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let h = Harness::new();
    let request = Request::builder()
        .method("POST")
        .uri("/navigation")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(state(&h), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 4000);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = Harness::new();
    let mut st = state(&h);
    st.max_request_bytes = Some(64);
    let (status, body) = send(
        st,
        post(
            "/access",
            json!({"requestedUrl": "https://youtube.com", "reason": "x".repeat(256)}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["errorCode"], 4001);
}

#[tokio::test]
async fn block_page_view_describes_the_requested_site() {
    let h = Harness::new();
    let uri = "/block-page?requestedUrl=https%3A%2F%2Fwww.instagram.com%2Fexplore";
    let (status, body) = send(state(&h), get(uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestedUrl"], "https://www.instagram.com/explore");
    assert_eq!(body["domain"], "instagram.com");
    assert_eq!(body["siteName"], "Instagram");

    let (status, body) = send(state(&h), get("/block-page")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 4002);
}

#[tokio::test]
async fn access_flow_maps_refusals_to_statuses() {
    let h = Harness::new();
    send(
        state(&h),
        post("/navigation", json!({"tabId": 2, "url": "https://youtube.com/"})),
    )
    .await;
    let (status, body) = send(state(&h), post("/block-page/open", json!({"tabId": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reasonPending"], true);
    assert_eq!(body["state"], "reasonPending");

    let (status, body) = send(
        state(&h),
        post(
            "/access",
            json!({"tabId": 2, "requestedUrl": "https://youtube.com/", "reason": "ok"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errorCode"], 4220);
    assert_eq!(body["diagnostics"]["rule"], "too_short");

    let (status, body) = send(
        state(&h),
        post(
            "/access",
            json!({
                "tabId": 2,
                "requestedUrl": "https://youtube.com/",
                "reason": "preciso revisar métricas do canal"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["domain"], "youtube.com");
    assert_eq!(body["redirectUrl"], "https://youtube.com/");
    assert_eq!(body["expiresAtMs"], T0 + 10 * MINUTE_MS);
    assert_eq!(body["wasContentCreation"], true);

    h.clock.advance_minutes(5);
    let (status, body) = send(
        state(&h),
        post(
            "/access",
            json!({"requestedUrl": "https://youtube.com/", "reason": "preciso estudar agora"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["errorCode"], 4290);
    assert_eq!(body["diagnostics"]["retryAfterMs"], 55 * MINUTE_MS);

    let (status, body) = send(
        state(&h),
        post(
            "/access",
            json!({"requestedUrl": "nonsense", "reason": "preciso estudar agora"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 4003);
}

#[tokio::test]
async fn unwritable_ledger_is_service_unavailable() {
    let h = Harness::new();
    h.settings.set_failing(true);
    let (status, body) = send(
        state(&h),
        post(
            "/access",
            json!({"requestedUrl": "https://reddit.com/", "reason": "preciso estudar agora"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errorCode"], 5031);
}

#[tokio::test]
async fn blocklist_endpoints_manage_custom_entries() {
    let h = Harness::new();
    let (status, body) = send(
        state(&h),
        post("/blocklist", json!({"entry": "https://www.twitch.tv/x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["entry"], "twitch.tv");

    let (status, body) = send(
        state(&h),
        post("/blocklist", json!({"entry": "twitch.tv", "mode": "domain"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorCode"], 4090);

    let (status, body) = send(
        state(&h),
        post("/blocklist", json!({"entry": "  ", "mode": "url"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 4004);

    let (_, body) = send(state(&h), get("/blocklist")).await;
    assert_eq!(body["defaults"], json!(["youtube.com", "facebook.com", "reddit.com"]));
    assert_eq!(body["custom"], json!(["twitch.tv"]));

    let delete = Request::builder()
        .method("DELETE")
        .uri("/blocklist")
        .header("content-type", "application/json")
        .body(Body::from(json!({"entry": "twitch.tv"}).to_string()))
        .unwrap();
    let (status, body) = send(state(&h), delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
}

#[tokio::test]
async fn history_endpoints_list_prune_and_clear() {
    let h = Harness::new();
    for url in ["https://youtube.com/", "https://reddit.com/", "https://facebook.com/"] {
        h.interceptor
            .request_access(&flocus::AccessRequest {
                tab_id: None,
                requested_url: url.to_string(),
                reason: "preciso estudar agora".to_string(),
            })
            .await
            .unwrap();
        h.clock.advance_ms(1);
    }

    let (status, body) = send(state(&h), get("/history?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["domain"], "facebook.com");
    assert_eq!(entries[1]["domain"], "reddit.com");
    assert_eq!(entries[0]["wasContentCreation"], false);

    h.clock.advance_ms(40 * 24 * 60 * MINUTE_MS);
    let (status, body) = send(state(&h), post("/history/prune", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 3);

    h.interceptor
        .request_access(&flocus::AccessRequest {
            tab_id: None,
            requested_url: "https://youtube.com/".into(),
            reason: "preciso estudar agora".into(),
        })
        .await
        .unwrap();
    let delete = Request::builder()
        .method("DELETE")
        .uri("/history")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(state(&h), delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.history.recent_entries(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn bearer_tokens_are_enforced_when_configured() {
    let h = Harness::new();
    let mut st = state(&h);
    st.allowed_tokens = Some(HashSet::from(["good".to_string()]));

    let (status, body) = send(st.clone(), get("/blocklist")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], 2001);

    let bad = Request::builder()
        .uri("/blocklist")
        .header("Authorization", "Bearer bad")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(st.clone(), bad).await.0, StatusCode::UNAUTHORIZED);

    let good = Request::builder()
        .uri("/blocklist")
        .header("Authorization", "bearer good")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(st.clone(), good).await.0, StatusCode::OK);

    // Liveness stays open.
    let (status, body) = send(st, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["grantMinutes"], 10);
}

#[tokio::test]
async fn removed_tabs_are_dropped_from_tracking() {
    let h = Harness::new();
    for tab_id in 1..=3 {
        send(
            state(&h),
            post(
                "/navigation",
                json!({"tabId": tab_id, "url": "https://www.reddit.com/"}),
            ),
        )
        .await;
    }
    assert_eq!(h.interceptor.tracked_tabs(), 3);

    let delete = |tab_id: i64| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/tabs/{}", tab_id))
            .body(Body::empty())
            .unwrap()
    };
    let (status, body) = send(state(&h), delete(2)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forgotten"], true);
    let (_, body) = send(state(&h), delete(2)).await;
    assert_eq!(body["forgotten"], false);

    assert_eq!(h.interceptor.tracked_tabs(), 2);
    let (_, tab) = send(state(&h), get("/tabs/2")).await;
    assert_eq!(tab["state"], "unchecked");
}
