//! Streaming transport: the relay side of `sync::transport::Streaming`,
//! grounded on `api::websocket`'s split-reader/writer-with-mpsc-forwarding
//! task pattern, retargeted from a chat socket onto pairing/queue state.
//!
//! One broadcast channel per pairing lets multiple connected devices (e.g.
//! a phone and a watch on the same pairing) observe each other's
//! `mode_changed`/`state_request` traffic without persisting mode anywhere.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::ApiState;
use crate::queues::question::Answer;
use crate::sync::transport::InboundEvent;
use crate::sync::{AnswerKey, OutboundMessage};

const BROADCAST_CAPACITY: usize = 32;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-pairing broadcast fan-out for streaming connections.
#[derive(Default)]
pub struct StreamRegistry {
    channels: DashMap<String, broadcast::Sender<InboundEvent>>,
}

impl StreamRegistry {
    fn channel(&self, pairing_id: &str) -> broadcast::Sender<InboundEvent> {
        self.channels
            .entry(pairing_id.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ws/{pairing_id}", get(upgrade)).with_state(state)
}

async fn upgrade(
    State(state): State<Arc<ApiState>>,
    Path(pairing_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, pairing_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, pairing_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let tx = state.streams.channel(&pairing_id);
    let mut broadcast_rx = tx.subscribe();

    if send_event(&mut sender, &InboundEvent::StateSync { pairing_id: pairing_id.clone() })
        .await
        .is_err()
    {
        return;
    }

    tracing::info!(pairing_id = %pairing_id, "streaming client connected");

    let mut seen_approvals = HashSet::new();
    let mut seen_questions = HashSet::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in poll_new_events(&state, &pairing_id, &mut seen_approvals, &mut seen_questions).await {
                    if send_event(&mut sender, &event).await.is_err() {
                        return;
                    }
                }
            }
            incoming = broadcast_rx.recv() => {
                match incoming {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(message) = serde_json::from_str::<OutboundMessage>(&text) {
                            handle_inbound(&state, &tx, message).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(pairing_id = %pairing_id, "streaming client disconnected");
                        return;
                    }
                    Some(Ok(_)) | Some(Err(_)) => {}
                }
            }
        }
    }
}

async fn send_event(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &InboundEvent,
) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(event) else { return Ok(()) };
    sender.send(Message::Text(text.into())).await
}

async fn handle_inbound(state: &ApiState, tx: &broadcast::Sender<InboundEvent>, message: OutboundMessage) {
    match message {
        OutboundMessage::Approve { pairing_id, id } => {
            let _ = state.approvals.respond(&pairing_id, &id, true).await;
        }
        OutboundMessage::Reject { pairing_id, id } => {
            let _ = state.approvals.respond(&pairing_id, &id, false).await;
        }
        OutboundMessage::QuestionAnswer { pairing_id, question_id, answer } => {
            let _ = state.questions.answer(&pairing_id, &question_id, answer_from_key(answer)).await;
        }
        OutboundMessage::ModeChanged { pairing_id, mode } => {
            let _ = tx.send(InboundEvent::ModeChanged {
                pairing_id,
                auto_accept: matches!(mode, crate::sync::PairingMode::AutoAccept),
            });
        }
        OutboundMessage::StateRequest { pairing_id } => {
            let _ = tx.send(InboundEvent::StateSync { pairing_id });
        }
    }
}

fn answer_from_key(key: AnswerKey) -> Answer {
    match key {
        AnswerKey::HandleOnMac => Answer::HandleOnMac(crate::queues::question::HANDLE_ON_MAC.to_string()),
        AnswerKey::Single(idx) => Answer::Single(idx),
        AnswerKey::Multiple(indices) => Answer::Multiple(indices),
    }
}

async fn poll_new_events(
    state: &ApiState,
    pairing_id: &str,
    seen_approvals: &mut HashSet<String>,
    seen_questions: &mut HashSet<String>,
) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if let Ok(pending) = state.approvals.fetch_pending(pairing_id).await {
        for request in pending {
            if seen_approvals.insert(request.id.clone()) {
                events.push(InboundEvent::ActionRequested {
                    pairing_id: pairing_id.to_string(),
                    id: request.id,
                });
            }
        }
    }

    if let Ok(pending) = state.questions.fetch_pending(pairing_id).await {
        for request in pending {
            if seen_questions.insert(request.question_id.clone()) {
                events.push(InboundEvent::ActionRequested {
                    pairing_id: pairing_id.to_string(),
                    id: request.question_id,
                });
            }
        }
    }

    if let Ok(Some(snapshot)) = state.progress.fetch(pairing_id).await {
        events.push(InboundEvent::ProgressUpdate { pairing_id: pairing_id.to_string(), snapshot });
    }

    events
}
