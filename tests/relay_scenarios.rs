//! End-to-end relay scenarios, driven against a manually-assembled router
//! (mirrors the teacher's `tests/api.rs`) since `ApiServer::router` is
//! private to the production binary/library boundary.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_test_router, build_test_state};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post(router: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

async fn delete(router: &axum::Router, uri: &str) -> StatusCode {
    let response = router
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    response.status()
}

/// Scenario A: pair, enqueue an approval, answer it from the wrist, the
/// bridge observes the resolution.
#[tokio::test]
async fn scenario_a_pair_then_approve_then_resolve() {
    let state = build_test_state();
    let router = build_test_router(state);

    let (status, body) = post(
        &router,
        "/pair/initiate",
        json!({"deviceToken": "tok-A", "publicKey": "watch-pub"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let watch_id = body["watchId"].as_str().unwrap().to_string();
    let code = body["code"].as_str().unwrap().to_string();

    let (status, body) = post(
        &router,
        "/pair/complete",
        json!({"code": code, "deviceToken": "tok-A", "publicKey": "cli-pub"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pairing_id = body["pairingId"].as_str().unwrap().to_string();

    let (status, body) = get(&router, &format!("/pair/status/{watch_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paired"], true);

    let (status, _) = post(
        &router,
        "/approval",
        json!({
            "pairingId": pairing_id,
            "id": "req-1",
            "type": "tool_use",
            "title": "Run npm install",
            "command": "npm install",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&router, &format!("/approval-queue/{pairing_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 1);

    let (status, _) = post(&router, "/approval/req-1", json!({"pairingId": pairing_id, "approved": true})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&router, &format!("/approval/{pairing_id}/req-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
}

/// Scenario B: re-posting the same approval id is a no-op, and responding
/// twice never flips an already-resolved status.
#[tokio::test]
async fn scenario_b_idempotent_reenqueue_and_response() {
    let state = build_test_state();
    let router = build_test_router(state);

    let enqueue = json!({
        "pairingId": "p1",
        "id": "dup",
        "type": "tool_use",
        "title": "Delete file",
    });
    post(&router, "/approval", enqueue.clone()).await;
    post(&router, "/approval", enqueue).await;

    let (_, body) = get(&router, "/approval-queue/p1").await;
    assert_eq!(body["totalCount"], 1);

    post(&router, "/approval/dup", json!({"pairingId": "p1", "approved": true})).await;
    post(&router, "/approval/dup", json!({"pairingId": "p1", "approved": false})).await;

    let (_, body) = get(&router, "/approval/p1/dup").await;
    assert_eq!(body["status"], "approved");
}

/// Scenario C: an expired/unknown pairing code resolves to not-found, and
/// a watch status check against an unpaired watch is not-found.
#[tokio::test]
async fn scenario_c_unknown_code_is_not_found() {
    let state = build_test_state();
    let router = build_test_router(state);

    let (status, _) = post(
        &router,
        "/pair/complete",
        json!({"code": "999999", "deviceToken": "tok", "publicKey": "cli-pub"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&router, "/pair/status/nonexistent-watch").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Scenario D (reconnect/backoff timing) is covered at the unit level by
/// `backoff::tests` and `sync::tests`, which exercise the jittered bound
/// and state-machine transitions directly under `start_paused` time
/// control; nothing in the HTTP surface itself is reconnect-specific.

/// Scenario E (bridge cancellation) is covered at the unit level by
/// `bridge::tests::control_cancel_request_removes_inflight_entry_without_responding`,
/// since driving a real child process through this integration harness
/// would require spawning an external binary.

/// Scenario F: a multi-select question rejects an empty answer set and
/// accepts a valid one.
#[tokio::test]
async fn scenario_f_question_multi_select_roundtrip() {
    let state = build_test_state();
    let router = build_test_router(state);

    let (status, _) = post(
        &router,
        "/question",
        json!({
            "pairingId": "p1",
            "questionId": "q1",
            "question": "Which files?",
            "options": [{"label": "a.rs"}, {"label": "b.rs"}, {"label": "c.rs"}],
            "multiSelect": true,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&router, "/question/q1", json!({"pairingId": "p1", "answer": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&router, "/question/q1", json!({"pairingId": "p1", "answer": [0, 2]})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&router, "/question/p1/q1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "answered");
    assert_eq!(body["answer"], json!([0, 2]));
}

/// Session-control: stop then resume round-trips through the HTTP surface,
/// and an ended session rejects further interrupts.
#[tokio::test]
async fn session_interrupt_stop_then_resume() {
    let state = build_test_state();
    let router = build_test_router(state);

    let (status, body) = post(&router, "/session-interrupt", json!({"pairingId": "p1", "action": "stop"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interrupted"], true);

    let (status, body) = post(&router, "/session-interrupt", json!({"pairingId": "p1", "action": "resume"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interrupted"], false);

    let (status, _) = post(&router, "/session-end", json!({"pairingId": "p1"})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&router, "/session-interrupt", json!({"pairingId": "p1", "action": "stop"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Progress snapshots are last-write-wins by `updatedAt`, visible through
/// `GET /session-progress/{pairingId}`.
#[tokio::test]
async fn session_progress_last_write_wins() {
    let state = build_test_state();
    let router = build_test_router(state);

    let t0 = chrono::Utc::now();
    post(
        &router,
        "/session-progress",
        json!({
            "pairingId": "p1",
            "progress": 0.2,
            "completedCount": 1,
            "totalCount": 5,
            "elapsedSeconds": 10,
            "updatedAt": t0,
        }),
    )
    .await;

    let stale = t0 - chrono::Duration::seconds(30);
    post(
        &router,
        "/session-progress",
        json!({
            "pairingId": "p1",
            "progress": 0.9,
            "completedCount": 4,
            "totalCount": 5,
            "elapsedSeconds": 1,
            "updatedAt": stale,
        }),
    )
    .await;

    let (status, body) = get(&router, "/session-progress/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert!((body["progress"]["progress"].as_f64().unwrap() - 0.2).abs() < f64::EPSILON);
}

/// `DELETE /approval-queue/{pairingId}` drains the whole queue.
#[tokio::test]
async fn approval_queue_drain_clears_pending() {
    let state = build_test_state();
    let router = build_test_router(state);

    post(
        &router,
        "/approval",
        json!({"pairingId": "p1", "id": "r1", "type": "tool_use", "title": "t"}),
    )
    .await;

    let status = delete(&router, "/approval-queue/p1").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&router, "/approval-queue/p1").await;
    assert_eq!(body["totalCount"], 0);
}

#[tokio::test]
async fn health_and_ready_endpoints_report_ok() {
    let state = build_test_state();
    let router = build_test_router(state);

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&router, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
