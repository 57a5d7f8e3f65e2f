//! HTTP client the bridge uses to talk to the relay, with exponential
//! backoff on connectivity failures (spec.md §4.6's retry requirement).

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::queues::approval::ApprovalStatus;
use crate::queues::question::{Answer, QuestionStatus};
use crate::{backoff, Error, Result};

/// Cap on every outbound HTTP call to the relay.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The bridge's HTTP client toward the relay.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    client: reqwest::Client,
}

impl RelayClient {
    /// # Panics
    ///
    /// Panics only if the TLS backend cannot be initialized, which
    /// indicates a broken build environment.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }

    /// Post a new approval request. Idempotent on `id` relay-side.
    pub async fn post_approval(&self, body: &ApprovalPostBody) -> Result<()> {
        self.post_json("/approval", body).await
    }

    /// Post a new question.
    pub async fn post_question(&self, body: &QuestionPostBody) -> Result<()> {
        self.post_json("/question", body).await
    }

    /// Poll an approval's resolution.
    pub async fn fetch_approval_status(&self, pairing_id: &str, id: &str) -> Result<ApprovalStatus> {
        #[derive(serde::Deserialize)]
        struct Resp {
            status: ApprovalStatus,
        }
        let resp: Resp = self
            .get_json(&format!("/approval/{pairing_id}/{id}"))
            .await?;
        Ok(resp.status)
    }

    /// Poll a question's resolution.
    pub async fn fetch_question_status(
        &self,
        pairing_id: &str,
        question_id: &str,
    ) -> Result<(QuestionStatus, Option<Answer>)> {
        #[derive(serde::Deserialize)]
        struct Resp {
            status: QuestionStatus,
            #[serde(default)]
            answer: Option<Answer>,
        }
        let resp: Resp = self
            .get_json(&format!("/question/{pairing_id}/{question_id}"))
            .await?;
        Ok((resp.status, resp.answer))
    }

    /// Best-effort delete of a pending approval (used on
    /// `control_cancel_request`). Failures are swallowed by the caller.
    pub async fn delete_approval(&self, pairing_id: &str, id: &str) -> Result<()> {
        let url = format!("{}/approval/{pairing_id}/{id}", self.base_url);
        let response = self.client.delete(&url).send().await.map_err(map_reqwest)?;
        if response.status().is_success() || response.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(Error::UpstreamUnavailable(format!(
                "relay returned {} deleting approval",
                response.status()
            )))
        }
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest)?;

        if response.status().is_success() {
            Ok(())
        } else if response.status().as_u16() == 400 {
            Err(Error::InvalidInput(format!("relay rejected request to {path}")))
        } else {
            Err(Error::UpstreamUnavailable(format!(
                "relay returned {} for {path}",
                response.status()
            )))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_reqwest)?;

        if response.status().as_u16() == 404 {
            return Err(Error::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "relay returned {} for {path}",
                response.status()
            )));
        }
        response.json().await.map_err(map_reqwest)
    }

    /// Run `f` until it succeeds, retrying on `Transport`/`UpstreamUnavailable`
    /// errors with truncated exponential backoff. Returns early if
    /// `cancel` fires. The bridge relies on this to satisfy "while
    /// unreachable, no `control_response` is sent".
    pub async fn with_backoff<F, Fut, T>(&self, cancel: &CancellationToken, mut f: F) -> Option<Result<T>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                result = f() => match result {
                    Ok(value) => return Some(Ok(value)),
                    Err(err @ (Error::Transport(_) | Error::UpstreamUnavailable(_))) => {
                        tracing::warn!(attempt, error = %err, "relay unreachable, backing off");
                        tokio::select! {
                            () = cancel.cancelled() => return None,
                            () = tokio::time::sleep(backoff::delay(attempt)) => {}
                        }
                        attempt += 1;
                    }
                    Err(other) => return Some(Err(other)),
                },
            }
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

/// Body for `POST /approval`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPostBody {
    pub pairing_id: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Body for `POST /question`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPostBody {
    pub pairing_id: String,
    pub question_id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub options: Vec<crate::queues::question::QuestionOption>,
    pub multi_select: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_answer: Option<String>,
}
