//! The two transport modes a pairing can select (spec.md §4.7): a
//! streaming WebSocket transport and a fixed-interval polling transport.
//! Both implement the same `Transport` trait so `SyncCore` stays agnostic
//! to which one is wired in.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::{Error, Result};

use super::OutboundMessage;

/// Default polling cadence (spec.md §4.7).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Handshake timeout guarding the streaming transport's connect step.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Ping cadence while streaming-connected.
pub const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Pong deadline after any ping.
pub const PONG_DEADLINE: Duration = Duration::from_secs(10);

/// Server-pushed events, shared vocabulary between the streaming and
/// polling transports (polling synthesizes these from its REST responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    StateSync { pairing_id: String },
    ActionRequested { pairing_id: String, id: String },
    ProgressUpdate { pairing_id: String, snapshot: crate::queues::progress::ProgressSnapshot },
    TaskStarted { pairing_id: String, name: String },
    TaskCompleted { pairing_id: String, name: String },
    ModeChanged { pairing_id: String, auto_accept: bool },
    Pong,
}

/// What a sync core drives: connect, send outbound messages, and receive
/// whatever the transport has accumulated since the last poll.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection and wait for the first server message (the
    /// "handshake"). Callers apply `HANDSHAKE_TIMEOUT` around this call.
    async fn connect(&mut self) -> Result<()>;

    async fn send(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Return whatever inbound events are available without blocking
    /// indefinitely; an empty vec means "nothing new this round".
    async fn poll_inbound(&mut self) -> Result<Vec<InboundEvent>>;

    async fn disconnect(&mut self);
}

/// Fixed-interval REST polling against the relay's approval/question/progress
/// endpoints. Pauses on background entry, resumes on foreground (the
/// `paused` flag is toggled by the caller via `set_paused`).
pub struct Polling {
    base_url: String,
    client: reqwest::Client,
    pairing_id: String,
    interval: Duration,
    paused: bool,
}

impl Polling {
    #[must_use]
    pub fn new(base_url: impl Into<String>, pairing_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            pairing_id: pairing_id.into(),
            interval: DEFAULT_POLL_INTERVAL,
            paused: false,
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Transport for Polling {
    async fn connect(&mut self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_reqwest)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transport(format!("relay health check returned {}", response.status())))
        }
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        match message {
            OutboundMessage::Approve { pairing_id, id } => {
                self.respond_approval(pairing_id, id, true).await
            }
            OutboundMessage::Reject { pairing_id, id } => {
                self.respond_approval(pairing_id, id, false).await
            }
            OutboundMessage::QuestionAnswer { pairing_id, question_id, answer } => {
                #[derive(Serialize)]
                struct Body {
                    #[serde(rename = "pairingId")]
                    pairing_id: String,
                    answer: serde_json::Value,
                }
                let url = format!("{}/question/{question_id}", self.base_url);
                let body = Body { pairing_id: pairing_id.clone(), answer: answer_key_to_json(answer) };
                let response = self.client.post(&url).json(&body).send().await.map_err(map_reqwest)?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(Error::UpstreamUnavailable(format!("relay returned {}", response.status())))
                }
            }
            OutboundMessage::ModeChanged { .. } | OutboundMessage::StateRequest { .. } => {
                // Polling has no dedicated endpoint for these; the next
                // regular poll round picks up the new mode/state anyway.
                Ok(())
            }
        }
    }

    async fn poll_inbound(&mut self) -> Result<Vec<InboundEvent>> {
        if self.paused {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();

        #[derive(serde::Deserialize)]
        struct Resp {
            progress: Option<crate::queues::progress::ProgressSnapshot>,
        }

        let url = format!("{}/session-progress/{}", self.base_url, self.pairing_id);
        if let Ok(response) = self.client.get(&url).send().await {
            if response.status().is_success() {
                if let Ok(Resp { progress: Some(snapshot) }) = response.json().await {
                    events.push(InboundEvent::ProgressUpdate {
                        pairing_id: self.pairing_id.clone(),
                        snapshot,
                    });
                }
            }
        }

        Ok(events)
    }

    async fn disconnect(&mut self) {
        self.paused = true;
    }
}

impl Polling {
    async fn respond_approval(&self, pairing_id: &str, id: &str, approved: bool) -> Result<()> {
        #[derive(Serialize)]
        struct Body {
            #[serde(rename = "pairingId")]
            pairing_id: String,
            approved: bool,
        }
        let url = format!("{}/approval/{id}", self.base_url);
        let body = Body { pairing_id: pairing_id.to_string(), approved };
        let response = self.client.post(&url).json(&body).send().await.map_err(map_reqwest)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::UpstreamUnavailable(format!("relay returned {}", response.status())))
        }
    }
}

/// Convert the sync core's answer key into the untagged JSON shape the
/// relay's `queues::question::Answer` expects.
fn answer_key_to_json(answer: &super::AnswerKey) -> serde_json::Value {
    match answer {
        super::AnswerKey::HandleOnMac => {
            serde_json::Value::String(crate::queues::question::HANDLE_ON_MAC.to_string())
        }
        super::AnswerKey::Single(idx) => serde_json::json!(idx),
        super::AnswerKey::Multiple(indices) => serde_json::json!(indices),
    }
}

/// Bidirectional WebSocket transport, consumed here from the client side.
/// Mirrors the relay's own `axum::ws` message shapes so both ends speak the
/// same JSON-over-text-frame protocol.
pub struct Streaming {
    url: String,
    socket: Option<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>,
}

impl Streaming {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), socket: None }
    }
}

#[async_trait]
impl Transport for Streaming {
    async fn connect(&mut self) -> Result<()> {
        let (socket, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Transport("not connected".into()))?;
        let text = serde_json::to_string(message)?;
        socket
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn poll_inbound(&mut self) -> Result<Vec<InboundEvent>> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::Transport("not connected".into()))?;

        let mut events = Vec::new();
        while let Ok(Some(next)) = tokio::time::timeout(Duration::from_millis(10), socket.next()).await {
            match next {
                Ok(WsMessage::Text(text)) => {
                    if let Ok(event) = serde_json::from_str::<InboundEvent>(&text) {
                        events.push(event);
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        Ok(events)
    }

    async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Transport(err.to_string())
    } else {
        Error::UpstreamUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_starts_unpaused_with_default_interval() {
        let polling = Polling::new("http://localhost:8080", "p1");
        assert_eq!(polling.interval(), DEFAULT_POLL_INTERVAL);
        assert!(!polling.paused);
    }

    #[test]
    fn set_paused_toggles_state() {
        let mut polling = Polling::new("http://localhost:8080", "p1");
        polling.set_paused(true);
        assert!(polling.paused);
    }
}
