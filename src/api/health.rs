//! Liveness/readiness endpoints: `GET /health` (spec.md §6) plus `GET /ready`
//! (ambient, mirrors the teacher's `health::ready_router`).

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::ApiState;
use crate::kv::KvStore;

/// Liveness response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub kv: CheckResult,
    pub push: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self { status: "ok", message: None }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self { status: "fail", message: Some(message.into()) }
    }

    fn unavailable() -> Self {
        Self { status: "unavailable", message: Some("not configured".to_string()) }
    }
}

/// Liveness probe: is the process running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

/// Build the liveness router (no state needed).
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Readiness probe: can the relay actually serve requests?
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let kv_check = check_kv(&state).await;
    let push_check = check_push(&state);

    let all_ok = kv_check.status == "ok";
    let status = if all_ok { "ok" } else { "degraded" };
    let http_status = if all_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks { kv: kv_check, push: push_check },
        }),
    )
}

/// Build the readiness router.
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}

/// A round-trip write/read/delete against the KV fabric.
async fn check_kv(state: &ApiState) -> CheckResult {
    const PROBE_KEY: &str = "__readiness_probe__";
    if let Err(e) = state.kv.put(PROBE_KEY, b"1".to_vec(), None).await {
        return CheckResult::fail(format!("kv write failed: {e}"));
    }
    match state.kv.get(PROBE_KEY).await {
        Ok(Some(_)) => {
            let _ = state.kv.delete(PROBE_KEY).await;
            CheckResult::ok()
        }
        Ok(None) => CheckResult::fail("kv probe write did not persist"),
        Err(e) => CheckResult::fail(format!("kv read failed: {e}")),
    }
}

fn check_push(state: &ApiState) -> CheckResult {
    if state.push.is_some() {
        CheckResult::ok()
    } else {
        CheckResult::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(resp) = health().await;
        assert_eq!(resp.status, "ok");
    }
}
