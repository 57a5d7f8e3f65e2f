//! Approval queue endpoints: `POST /approval`, `GET /approval-queue/{pairingId}`,
//! `POST /approval/{requestId}`, `GET /approval/{pairingId}/{requestId}`,
//! `DELETE /approval-queue/{pairingId}`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::push::{HintKind, PushHint};
use crate::queues::approval::{ApprovalRequest, ApprovalStatus};
use crate::{Error, Result};

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/approval", post(enqueue))
        .route("/approval/{pairing_id}/{request_id}", get(get_one).delete(delete_one))
        .route("/approval/{request_id}", post(respond))
        .route("/approval-queue/{pairing_id}", get(list_pending).delete(drain))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    pairing_id: String,
    id: String,
    #[serde(rename = "type")]
    kind: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "filePath")]
    file_path: Option<String>,
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    success: bool,
    request_id: String,
}

async fn enqueue(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse> {
    state
        .approvals
        .enqueue(
            &body.pairing_id,
            &body.id,
            &body.kind,
            &body.title,
            body.description,
            body.file_path,
            body.command,
        )
        .await?;

    if let Some(push) = &state.push {
        push.notify(PushHint {
            pairing_id: body.pairing_id.clone(),
            kind: HintKind::Approval,
            id: body.id.clone(),
        })
        .await;
    }

    Ok(Json(EnqueueResponse { success: true, request_id: body.id }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    requests: Vec<ApprovalRequest>,
    total_count: usize,
}

async fn list_pending(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    let requests = state.approvals.fetch_pending(&pairing_id).await?;
    let total_count = requests.len();
    Ok(Json(ListResponse { requests, total_count }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest {
    pairing_id: String,
    approved: bool,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn respond(
    State(state): State<Arc<ApiState>>,
    Path(request_id): Path<String>,
    Json(body): Json<RespondRequest>,
) -> Result<impl IntoResponse> {
    state.approvals.respond(&body.pairing_id, &request_id, body.approved).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailResponse {
    id: String,
    status: ApprovalStatus,
    #[serde(rename = "type")]
    kind: String,
    title: String,
}

async fn get_one(
    State(state): State<Arc<ApiState>>,
    Path((pairing_id, request_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let request = state.approvals.get(&pairing_id, &request_id).await?;
    Ok(Json(DetailResponse {
        id: request.id,
        status: request.status,
        kind: request.kind,
        title: request.title,
    }))
}

/// Best-effort single-request removal, used by the bridge on
/// `control_cancel_request`. Not part of spec.md's literal endpoint list;
/// `DELETE /approval-queue/{pairingId}` drains the whole queue, this drops
/// one entry. Treated as idempotent: deleting an already-resolved or
/// missing request still reports success.
async fn delete_one(
    State(state): State<Arc<ApiState>>,
    Path((pairing_id, request_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    match state.approvals.get(&pairing_id, &request_id).await {
        Ok(_) => {
            state.approvals.respond(&pairing_id, &request_id, false).await?;
            Ok(Json(SuccessResponse { success: true }))
        }
        Err(Error::NotFound(_)) => Ok(Json(SuccessResponse { success: true })),
        Err(other) => Err(other),
    }
}

async fn drain(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.approvals.drain(&pairing_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
