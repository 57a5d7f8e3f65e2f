//! Question queue: free-form questions with options, answered from the
//! wrist. Same FIFO/cap/TTL/idempotency rules as the approval queue, with
//! richer payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::{keys, retry_cas, KvStore};
use crate::queues::{QUEUE_CAPACITY, QUEUE_TTL_SECS};
use crate::{Error, Result};

/// Sentinel answer meaning "skipped, expect terminal input".
pub const HANDLE_ON_MAC: &str = "HANDLE_ON_MAC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Answered,
}

/// A single option offered to the wrist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
}

/// A single-select or multi-select answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    /// `multiSelect=false`, the sentinel "skipped" value.
    HandleOnMac(String),
    /// `multiSelect=false`, a single option index.
    Single(usize),
    /// `multiSelect=true`, a non-empty set of option indices.
    Multiple(Vec<usize>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    pub question_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub options: Vec<QuestionOption>,
    #[serde(default, alias = "multi_select")]
    pub multi_select: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "recommended_answer")]
    pub recommended_answer: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    pub status: QuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
}

/// Repository over a single pairing's question queue.
#[derive(Clone)]
pub struct QuestionQueue<S> {
    store: S,
}

impl<S> QuestionQueue<S>
where
    S: KvStore + 'static,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        pairing_id: &str,
        question_id: &str,
        question: &str,
        header: Option<String>,
        options: Vec<QuestionOption>,
        multi_select: bool,
        recommended_answer: Option<String>,
    ) -> Result<()> {
        let key = keys::question_queue(pairing_id);
        let ttl = std::time::Duration::from_secs(QUEUE_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            let mut queue = decode(current)?;

            if queue.iter().any(|q| q.question_id == question_id) {
                return Ok(Some(serde_json::to_vec(&queue)?));
            }

            queue.push(QuestionRequest {
                question_id: question_id.to_string(),
                question: question.to_string(),
                header: header.clone(),
                options: options.clone(),
                multi_select,
                recommended_answer: recommended_answer.clone(),
                created_at: Utc::now(),
                status: QuestionStatus::Pending,
                answer: None,
            });
            prune(&mut queue);
            Ok(Some(serde_json::to_vec(&queue)?))
        })
        .await
    }

    pub async fn fetch_pending(&self, pairing_id: &str) -> Result<Vec<QuestionRequest>> {
        let key = keys::question_queue(pairing_id);
        let queue = decode(self.store.get(&key).await?.as_deref())?;
        let mut pending: Vec<_> = queue
            .into_iter()
            .filter(|q| q.status == QuestionStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        Ok(pending)
    }

    /// Validate and record an answer. Exactly one answer per question.
    pub async fn answer(&self, pairing_id: &str, question_id: &str, answer: Answer) -> Result<()> {
        let key = keys::question_queue(pairing_id);
        let ttl = std::time::Duration::from_secs(QUEUE_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            let mut queue = decode(current)?;
            let Some(entry) = queue.iter_mut().find(|q| q.question_id == question_id) else {
                return Ok(Some(serde_json::to_vec(&queue)?));
            };
            if entry.status == QuestionStatus::Pending {
                validate_answer(entry, &answer)?;
                entry.status = QuestionStatus::Answered;
                entry.answer = Some(answer.clone());
            }
            Ok(Some(serde_json::to_vec(&queue)?))
        })
        .await
    }

    pub async fn fetch_response(&self, pairing_id: &str, question_id: &str) -> Result<QuestionRequest> {
        let key = keys::question_queue(pairing_id);
        let queue = decode(self.store.get(&key).await?.as_deref())?;
        queue
            .into_iter()
            .find(|q| q.question_id == question_id)
            .ok_or_else(|| Error::NotFound(format!("question {question_id} not found")))
    }

    pub async fn drain(&self, pairing_id: &str) -> Result<()> {
        self.store.delete(&keys::question_queue(pairing_id)).await
    }
}

fn validate_answer(entry: &QuestionRequest, answer: &Answer) -> Result<()> {
    match (entry.multi_select, answer) {
        (false, Answer::HandleOnMac(s)) if s == HANDLE_ON_MAC => Ok(()),
        (false, Answer::Single(idx)) => {
            if *idx < entry.options.len() {
                Ok(())
            } else {
                Err(Error::InvalidInput(format!("answer index {idx} out of range")))
            }
        }
        (true, Answer::Multiple(indices)) => {
            if indices.is_empty() {
                return Err(Error::InvalidInput("answer set must be non-empty".into()));
            }
            if indices.iter().any(|i| *i >= entry.options.len()) {
                return Err(Error::InvalidInput("answer index out of range".into()));
            }
            Ok(())
        }
        _ => Err(Error::InvalidInput(
            "answer shape does not match multiSelect".into(),
        )),
    }
}

fn decode(bytes: Option<&[u8]>) -> Result<Vec<QuestionRequest>> {
    match bytes {
        Some(b) => Ok(serde_json::from_slice(b)?),
        None => Ok(Vec::new()),
    }
}

fn prune(queue: &mut Vec<QuestionRequest>) {
    if queue.len() > QUEUE_CAPACITY {
        queue.sort_by_key(|q| q.created_at);
        let overflow = queue.len() - QUEUE_CAPACITY;
        queue.drain(0..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn queue() -> QuestionQueue<MemoryKv> {
        QuestionQueue::new(MemoryKv::new())
    }

    fn opts(labels: &[&str]) -> Vec<QuestionOption> {
        labels
            .iter()
            .map(|l| QuestionOption { label: (*l).to_string() })
            .collect()
    }

    #[tokio::test]
    async fn single_select_answer_roundtrip() {
        let q = queue();
        q.enqueue("p1", "q1", "Proceed?", None, opts(&["yes", "no"]), false, None)
            .await
            .unwrap();

        q.answer("p1", "q1", Answer::Single(0)).await.unwrap();
        let resp = q.fetch_response("p1", "q1").await.unwrap();
        assert_eq!(resp.status, QuestionStatus::Answered);
    }

    #[tokio::test]
    async fn multi_select_empty_set_is_rejected() {
        let q = queue();
        q.enqueue("p1", "q1", "Pick", None, opts(&["a", "b", "c"]), true, None)
            .await
            .unwrap();

        let err = q.answer("p1", "q1", Answer::Multiple(vec![])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn multi_select_answer_accepted() {
        let q = queue();
        q.enqueue("p1", "q1", "Pick", None, opts(&["a", "b", "c"]), true, None)
            .await
            .unwrap();

        q.answer("p1", "q1", Answer::Multiple(vec![0, 2])).await.unwrap();
        let resp = q.fetch_response("p1", "q1").await.unwrap();
        match resp.answer {
            Some(Answer::Multiple(v)) => assert_eq!(v, vec![0, 2]),
            other => panic!("unexpected answer {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_on_mac_accepted_for_single_select() {
        let q = queue();
        q.enqueue("p1", "q1", "Proceed?", None, opts(&["yes", "no"]), false, None)
            .await
            .unwrap();
        q.answer("p1", "q1", Answer::HandleOnMac(HANDLE_ON_MAC.to_string()))
            .await
            .unwrap();
        let resp = q.fetch_response("p1", "q1").await.unwrap();
        assert_eq!(resp.status, QuestionStatus::Answered);
    }
}
