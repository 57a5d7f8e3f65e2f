//! Question queue endpoints, symmetric to `approval`: `POST /question`,
//! `GET /question-queue/{pairingId}`, `POST /question/{questionId}`,
//! `GET /question/{pairingId}/{questionId}`, `DELETE /question-queue/{pairingId}`.

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
use crate::queues::question::{Answer, QuestionOption, QuestionStatus};
use crate::Result;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/question", post(enqueue))
        .route("/question/{pairing_id}/{question_id}", get(get_one))
        .route("/question/{question_id}", post(answer))
        .route("/question-queue/{pairing_id}", get(list_pending).delete(drain))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueRequest {
    pairing_id: String,
    question_id: String,
    question: String,
    #[serde(default)]
    header: Option<String>,
    options: Vec<QuestionOption>,
    #[serde(default)]
    multi_select: bool,
    #[serde(default)]
    recommended_answer: Option<String>,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn enqueue(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<EnqueueRequest>,
) -> Result<impl IntoResponse> {
    state
        .questions
        .enqueue(
            &body.pairing_id,
            &body.question_id,
            &body.question,
            body.header,
            body.options,
            body.multi_select,
            body.recommended_answer,
        )
        .await?;

    if let Some(push) = &state.push {
        push.notify(PushHint {
            pairing_id: body.pairing_id.clone(),
            kind: HintKind::Question,
            id: body.question_id.clone(),
        })
        .await;
    }

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    questions: Vec<crate::queues::question::QuestionRequest>,
    total_count: usize,
}

async fn list_pending(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    let questions = state.questions.fetch_pending(&pairing_id).await?;
    let total_count = questions.len();
    Ok(Json(ListResponse { questions, total_count }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerRequest {
    pairing_id: String,
    answer: Answer,
}

async fn answer(
    State(state): State<Arc<ApiState>>,
    Path(question_id): Path<String>,
    Json(body): Json<AnswerRequest>,
) -> Result<impl IntoResponse> {
    state.questions.answer(&body.pairing_id, &question_id, body.answer).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetailResponse {
    question_id: String,
    status: QuestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<Answer>,
}

async fn get_one(
    State(state): State<Arc<ApiState>>,
    Path((pairing_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let request = state.questions.fetch_response(&pairing_id, &question_id).await?;
    Ok(Json(DetailResponse {
        question_id: request.question_id,
        status: request.status,
        answer: request.answer,
    }))
}

async fn drain(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.questions.drain(&pairing_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
