//! Pairing endpoints: `POST /pair/initiate`, `GET /pair/status/{watchId}`,
//! `POST /pair/complete`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Result;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/initiate", post(initiate))
        .route("/status/{watch_id}", get(status))
        .route("/complete", post(complete))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    device_token: String,
    public_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    code: String,
    watch_id: String,
}

async fn initiate(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<InitiateRequest>,
) -> Result<impl IntoResponse> {
    let (code, watch_id) = state.pairing.initiate(&body.device_token, &body.public_key).await?;
    Ok(Json(InitiateResponse { code, watch_id }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pairing_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cli_public_key: Option<String>,
}

async fn status(
    State(state): State<Arc<ApiState>>,
    Path(watch_id): Path<String>,
) -> Result<impl IntoResponse> {
    let status = state.pairing.status(&watch_id).await?;
    Ok(Json(StatusResponse {
        paired: status.paired,
        pairing_id: status.pairing_id,
        cli_public_key: status.cli_public_key,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    code: String,
    #[serde(default)]
    device_token: Option<String>,
    public_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    pairing_id: String,
    watch_public_key: String,
}

async fn complete(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CompleteRequest>,
) -> Result<impl IntoResponse> {
    let device_token = body.device_token.as_deref().unwrap_or_default();
    let outcome = state.pairing.complete(&body.code, device_token, &body.public_key).await?;
    Ok(Json(CompleteResponse {
        pairing_id: outcome.pairing_id,
        watch_public_key: outcome.watch_public_key,
    }))
}
