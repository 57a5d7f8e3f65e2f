//! Shared test utilities

use std::sync::Arc;

use axum::Router;
use claude_watch_relay::api::{approval, health, pairing, progress, question, stream, ApiState};
use claude_watch_relay::kv::MemoryKv;
use claude_watch_relay::pairing::PairingRegistry;
use claude_watch_relay::queues::approval::ApprovalQueue;
use claude_watch_relay::queues::control::ControlStore;
use claude_watch_relay::queues::progress::ProgressStore;
use claude_watch_relay::queues::question::QuestionQueue;

/// Build a fresh in-memory `ApiState`.
#[must_use]
pub fn build_test_state() -> Arc<ApiState> {
    let kv = MemoryKv::new();
    Arc::new(ApiState {
        pairing: PairingRegistry::new(kv.clone()),
        approvals: ApprovalQueue::new(kv.clone()),
        questions: QuestionQueue::new(kv.clone()),
        progress: ProgressStore::new(kv.clone()),
        control: ControlStore::new(kv.clone()),
        kv,
        push: None,
        rate_limiter: None,
        streams: Arc::new(stream::StreamRegistry::default()),
    })
}

/// Mirror `ApiServer::router`'s nest/merge shape over a test state, without
/// the rate-limit/CORS/trace layers this crate's production router adds.
#[must_use]
pub fn build_test_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .nest("/pair", pairing::router(state.clone()))
        .merge(approval::router(state.clone()))
        .merge(question::router(state.clone()))
        .merge(progress::router(state.clone()))
        .merge(stream::router(state.clone()))
        .merge(health::router())
        .merge(health::ready_router(state))
}
