//! Progress and session-control endpoints: `POST /session-progress`,
//! `GET /session-progress/{pairingId}`, `POST /session-end`,
//! `GET /session-status/{pairingId}`, `POST /session-interrupt`,
//! `GET /session-interrupt/{pairingId}`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::push::{HintKind, PushHint};
use crate::queues::control::InterruptAction;
use crate::queues::progress::ProgressSnapshot;
use crate::Result;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session-progress", post(apply))
        .route("/session-progress/{pairing_id}", get(fetch))
        .route("/session-end", post(end))
        .route("/session-status/{pairing_id}", get(session_status))
        .route("/session-interrupt", post(interrupt))
        .route("/session-interrupt/{pairing_id}", get(interrupt_status))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyRequest {
    pairing_id: String,
    #[serde(flatten)]
    snapshot: ProgressSnapshot,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn apply(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ApplyRequest>,
) -> Result<impl IntoResponse> {
    state.progress.apply(&body.pairing_id, body.snapshot).await?;

    if let Some(push) = &state.push {
        push.notify(PushHint {
            pairing_id: body.pairing_id.clone(),
            kind: HintKind::Progress,
            id: body.pairing_id.clone(),
        })
        .await;
    }

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
struct FetchResponse {
    progress: Option<ProgressSnapshot>,
}

async fn fetch(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    let progress = state.progress.fetch(&pairing_id).await?;
    Ok(Json(FetchResponse { progress }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairingIdRequest {
    pairing_id: String,
}

async fn end(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<PairingIdRequest>,
) -> Result<impl IntoResponse> {
    state.approvals.drain(&body.pairing_id).await?;
    state.questions.drain(&body.pairing_id).await?;
    state.control.end(&body.pairing_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
struct SessionStatusResponse {
    #[serde(rename = "sessionActive")]
    session_active: bool,
}

async fn session_status(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    let control = state.control.fetch(&pairing_id).await?;
    Ok(Json(SessionStatusResponse { session_active: control.active }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterruptRequest {
    pairing_id: String,
    action: InterruptAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InterruptResponse {
    interrupted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<InterruptAction>,
}

async fn interrupt(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<InterruptRequest>,
) -> Result<impl IntoResponse> {
    let control = state.control.interrupt(&body.pairing_id, body.action).await?;
    Ok(Json(InterruptResponse {
        interrupted: control.interrupted,
        action: control.interrupt_action,
    }))
}

async fn interrupt_status(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    let control = state.control.fetch(&pairing_id).await?;
    Ok(Json(InterruptResponse {
        interrupted: control.interrupted,
        action: control.interrupt_action,
    }))
}
