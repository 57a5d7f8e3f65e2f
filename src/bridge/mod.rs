//! Streaming permission bridge: wraps an AI coding tool, intercepts its
//! JSON-over-stdio control protocol, and answers each permission request
//! from the wrist via the relay.
//!
//! Structured as three independent `tokio::spawn`s coordinated over
//! channels — a single stdout reader, a serialized stdin writer, and one
//! task per in-flight request posting outbound to the relay — grounded on
//! `api::websocket`'s split-reader/writer-with-mpsc-forwarding-task
//! pattern, adapted from a WebSocket connection to a child process's stdio.

pub mod pairing_state;
pub mod protocol;
pub mod relay_client;

use std::process::Stdio;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use protocol::{
    approval_kind, is_destructive_command, Behavior, ControlRequestBody, ControlResponse,
    PermissionResult, ToolFrame, ASK_USER_QUESTION_TOOL,
};
use relay_client::{ApprovalPostBody, QuestionPostBody, RelayClient};

use crate::queues::approval::ApprovalStatus;
use crate::queues::question::{Answer, QuestionOption, QuestionStatus};
use crate::{Error, Result};

/// How often an in-flight request polls the relay for its resolution.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Decides allow/deny locally when the relay is unreachable and the
/// operator has opted into local-fallback mode.
pub trait LocalFallback: Send + Sync {
    fn decide(&self, tool_name: &str, input: &Value) -> PermissionResult;
}

/// Never allows anything locally; used when local-fallback mode is off.
pub struct NoLocalFallback;

impl LocalFallback for NoLocalFallback {
    fn decide(&self, _tool_name: &str, _input: &Value) -> PermissionResult {
        PermissionResult {
            behavior: Behavior::Deny,
            updated_input: None,
            message: Some("relay unreachable and local fallback is disabled".into()),
        }
    }
}

/// Prompts the operator on the bridge's own terminal.
pub struct TerminalLocalFallback;

impl LocalFallback for TerminalLocalFallback {
    fn decide(&self, tool_name: &str, _input: &Value) -> PermissionResult {
        let allow = dialoguer::Confirm::new()
            .with_prompt(format!("relay unreachable — allow tool `{tool_name}` locally?"))
            .default(false)
            .interact()
            .unwrap_or(false);

        if allow {
            PermissionResult {
                behavior: Behavior::Allow,
                updated_input: None,
                message: None,
            }
        } else {
            PermissionResult {
                behavior: Behavior::Deny,
                updated_input: None,
                message: Some("User rejected from wearable".into()),
            }
        }
    }
}

/// Per in-flight request bookkeeping: a cancellation handle plus the
/// relay-side identifiers needed for the best-effort cancel delete.
struct InFlight {
    cancel: CancellationToken,
}

/// The bridge engine: spawns the wrapped tool and mediates its permission
/// protocol against the relay.
pub struct Bridge<F = NoLocalFallback> {
    relay: RelayClient,
    pairing_id: String,
    local_fallback: Option<Arc<F>>,
}

impl Bridge<NoLocalFallback> {
    #[must_use]
    pub fn new(relay: RelayClient, pairing_id: String) -> Self {
        Self {
            relay,
            pairing_id,
            local_fallback: None,
        }
    }
}

impl<F> Bridge<F>
where
    F: LocalFallback + 'static,
{
    /// Build a bridge with local-fallback mode enabled from the start,
    /// using `fallback` as the decision source when the relay is
    /// unreachable (tests use a stub; `claude-watch bridge run` uses
    /// `TerminalLocalFallback`).
    #[must_use]
    pub fn with_local_fallback(relay: RelayClient, pairing_id: String, fallback: F) -> Self {
        Self {
            relay,
            pairing_id,
            local_fallback: Some(Arc::new(fallback)),
        }
    }

    /// Spawn `command` with piped stdio and run the bridge until the
    /// child process exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the child cannot be spawned or its stdio pipes
    /// are unavailable.
    pub async fn run(&self, mut command: Command) -> Result<std::process::ExitStatus> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child: Child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout unavailable".into()))?;

        let (response_tx, response_rx) = mpsc::channel::<ControlResponse>(64);
        let inflight: Arc<DashMap<String, InFlight>> = Arc::new(DashMap::new());

        let writer_task = tokio::spawn(writer_loop(stdin, response_rx));

        let relay = self.relay.clone();
        let pairing_id = self.pairing_id.clone();
        let fallback = self.local_fallback.clone();
        let inflight_for_reader = Arc::clone(&inflight);
        let reader_task = tokio::spawn(async move {
            reader_loop(stdout, relay, pairing_id, fallback, inflight_for_reader, response_tx).await;
        });

        let status = child.wait().await?;

        reader_task.abort();
        for entry in inflight.iter() {
            entry.cancel.cancel();
        }
        drop(writer_task.await);

        Ok(status)
    }
}

async fn writer_loop(
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<ControlResponse>,
) {
    while let Some(response) = rx.recv().await {
        match response.to_line() {
            Ok(line) => {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to serialize control_response"),
        }
    }
}

async fn reader_loop<F>(
    stdout: tokio::process::ChildStdout,
    relay: RelayClient,
    pairing_id: String,
    fallback: Option<Arc<F>>,
    inflight: Arc<DashMap<String, InFlight>>,
    response_tx: mpsc::Sender<ControlResponse>,
) where
    F: LocalFallback + 'static,
{
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: ToolFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse control frame");
                continue;
            }
        };

        match frame {
            ToolFrame::ControlRequest { request_id, request } => {
                let cancel = CancellationToken::new();
                inflight.insert(request_id.clone(), InFlight { cancel: cancel.clone() });

                tokio::spawn(handle_request(
                    relay.clone(),
                    pairing_id.clone(),
                    request_id,
                    request,
                    fallback.clone(),
                    Arc::clone(&inflight),
                    response_tx.clone(),
                    cancel,
                ));
            }
            ToolFrame::ControlCancelRequest { request_id } => {
                if let Some((_, entry)) = inflight.remove(&request_id) {
                    entry.cancel.cancel();
                }
                let relay = relay.clone();
                let pairing_id = pairing_id.clone();
                tokio::spawn(async move {
                    let _ = relay.delete_approval(&pairing_id, &request_id).await;
                });
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_request<F>(
    relay: RelayClient,
    pairing_id: String,
    request_id: String,
    request: ControlRequestBody,
    fallback: Option<Arc<F>>,
    inflight: Arc<DashMap<String, InFlight>>,
    response_tx: mpsc::Sender<ControlResponse>,
    cancel: CancellationToken,
) where
    F: LocalFallback + 'static,
{
    let result = if request.tool_name == ASK_USER_QUESTION_TOOL {
        handle_question(&relay, &pairing_id, &request_id, &request, &cancel).await
    } else {
        handle_approval(&relay, &pairing_id, &request_id, &request, fallback, &cancel).await
    };

    inflight.remove(&request_id);

    match result {
        Some(permission) => {
            let response = ControlResponse::success(request_id, permission);
            let _ = response_tx.send(response).await;
        }
        None => {
            tracing::debug!(request_id = %request_id, "request cancelled before resolution");
        }
    }
}

async fn handle_approval<F>(
    relay: &RelayClient,
    pairing_id: &str,
    request_id: &str,
    request: &ControlRequestBody,
    fallback: Option<Arc<F>>,
    cancel: &CancellationToken,
) -> Option<PermissionResult>
where
    F: LocalFallback + 'static,
{
    let (title, description, file_path, command) = approval_fields(&request.tool_name, &request.input);

    let body = ApprovalPostBody {
        pairing_id: pairing_id.to_string(),
        id: request_id.to_string(),
        kind: approval_kind(&request.tool_name),
        title,
        description,
        file_path,
        command,
    };

    let post_result = relay.post_approval(&body).await;

    match &post_result {
        Ok(()) => {}
        Err(err @ (Error::Transport(_) | Error::UpstreamUnavailable(_))) => {
            if let Some(fallback) = fallback {
                tracing::warn!(error = %err, "relay unreachable, using local fallback");
                let tool_name = request.tool_name.clone();
                let input = request.input.clone();
                return tokio::task::spawn_blocking(move || fallback.decide(&tool_name, &input))
                    .await
                    .ok();
            }
            relay.with_backoff(cancel, || relay.post_approval(&body)).await?.ok()?;
        }
        Err(_) => return None,
    }

    let status = poll_until_resolved(cancel, || relay.fetch_approval_status(pairing_id, request_id)).await?;

    Some(match status {
        ApprovalStatus::Approved => PermissionResult {
            behavior: Behavior::Allow,
            updated_input: Some(request.input.clone()),
            message: None,
        },
        _ => PermissionResult {
            behavior: Behavior::Deny,
            updated_input: None,
            message: Some("User rejected from wearable".into()),
        },
    })
}

async fn handle_question(
    relay: &RelayClient,
    pairing_id: &str,
    request_id: &str,
    request: &ControlRequestBody,
    cancel: &CancellationToken,
) -> Option<PermissionResult> {
    let options: Vec<QuestionOption> = request
        .input
        .get("options")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|o| QuestionOption {
                    label: o
                        .get("label")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    let multi_select = request
        .input
        .get("multiSelect")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let question = request
        .input
        .get("question")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let body = QuestionPostBody {
        pairing_id: pairing_id.to_string(),
        question_id: request_id.to_string(),
        question,
        header: None,
        options,
        multi_select,
        recommended_answer: None,
    };

    relay
        .with_backoff(cancel, || relay.post_question(&body))
        .await?
        .ok()?;

    let (_, answer) = poll_until_resolved(cancel, || relay.fetch_question_status(pairing_id, request_id))
        .await?;

    let answers = answer.map(answer_to_strings).unwrap_or_default();
    let updated_input = merge_answers(&request.input, request_id, answers);

    Some(PermissionResult {
        behavior: Behavior::Allow,
        updated_input: Some(updated_input),
        message: None,
    })
}

/// Poll `f` until it reports a terminal resolution, backing off on
/// transport errors and treating `NotFound` as "still pending" per the
/// error-propagation policy. Returns `None` if `cancel` fires first.
async fn poll_until_resolved<T, F, Fut>(cancel: &CancellationToken, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    T: Resolvable,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            result = f() => match result {
                Ok(value) if value.is_resolved() => return Some(value),
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(_) => {}
            },
        }

        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

trait Resolvable {
    fn is_resolved(&self) -> bool;
}

impl Resolvable for ApprovalStatus {
    fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Resolvable for (QuestionStatus, Option<Answer>) {
    fn is_resolved(&self) -> bool {
        self.0 == QuestionStatus::Answered
    }
}

fn answer_to_strings(answer: Answer) -> Vec<String> {
    match answer {
        Answer::HandleOnMac(s) => vec![s],
        Answer::Single(idx) => vec![idx.to_string()],
        Answer::Multiple(indices) => indices.into_iter().map(|i| i.to_string()).collect(),
    }
}

fn merge_answers(input: &Value, request_id: &str, answers: Vec<String>) -> Value {
    let mut merged = input.clone();
    if let Value::Object(map) = &mut merged {
        let answers_entry = map
            .entry("answers")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(answers_map) = answers_entry {
            answers_map.insert(
                request_id.to_string(),
                Value::Array(answers.into_iter().map(Value::String).collect()),
            );
        }
    }
    merged
}

fn approval_fields(
    tool_name: &str,
    input: &Value,
) -> (String, Option<String>, Option<String>, Option<String>) {
    if let Some(command) = input.get("command").and_then(Value::as_str) {
        if is_destructive_command(command) {
            return (tool_name.to_string(), None, None, None);
        }
        return (command.to_string(), None, None, Some(command.to_string()));
    }

    let file_path = input
        .get("file_path")
        .or_else(|| input.get("filePath"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let description = if file_path.is_none() {
        Some(input.to_string())
    } else {
        None
    };

    (tool_name.to_string(), description, file_path, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_command_never_leaks_into_fields() {
        let input = serde_json::json!({"command": "rm -rf /"});
        let (title, description, file_path, command) = approval_fields("Bash", &input);
        assert_eq!(title, "Bash");
        assert!(description.is_none());
        assert!(file_path.is_none());
        assert!(command.is_none());
    }

    #[test]
    fn ordinary_bash_command_surfaces_in_title_and_command() {
        let input = serde_json::json!({"command": "npm install"});
        let (title, _, _, command) = approval_fields("Bash", &input);
        assert_eq!(title, "npm install");
        assert_eq!(command.as_deref(), Some("npm install"));
    }

    #[test]
    fn ordinary_tool_surfaces_command_field() {
        let input = serde_json::json!({"command": "npm install"});
        let (_, _, _, command) = approval_fields("RunScript", &input);
        assert_eq!(command.as_deref(), Some("npm install"));
    }

    #[test]
    fn merge_answers_adds_keyed_entry() {
        let input = serde_json::json!({"options": []});
        let merged = merge_answers(&input, "r1", vec!["0".into(), "2".into()]);
        assert_eq!(merged["answers"]["r1"], serde_json::json!(["0", "2"]));
    }

    #[test]
    fn control_cancel_request_removes_inflight_entry_without_responding() {
        let inflight: Arc<DashMap<String, InFlight>> = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();
        inflight.insert("r1".to_string(), InFlight { cancel: cancel.clone() });

        let removed = inflight.remove("r1");
        assert!(removed.is_some());
        let (_, entry) = removed.unwrap();
        entry.cancel.cancel();

        assert!(cancel.is_cancelled());
        assert!(inflight.get("r1").is_none());
    }
}
