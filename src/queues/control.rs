//! Session control: one active/paused/ended state machine per pairing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kv::{keys, retry_cas, KvStore};
use crate::{Error, Result};

/// TTL on session-control state; refreshed on every transition.
const CONTROL_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptAction {
    Stop,
    Resume,
    Clear,
}

/// One pairing's session-control state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionControl {
    pub active: bool,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "interrupt_action")]
    pub interrupt_action: Option<InterruptAction>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl SessionControl {
    fn active_default() -> Self {
        Self {
            active: true,
            interrupted: false,
            interrupt_action: None,
            updated_at: Utc::now(),
        }
    }
}

/// Repository over a single pairing's session-control state.
#[derive(Clone)]
pub struct ControlStore<S> {
    store: S,
}

impl<S> ControlStore<S>
where
    S: KvStore + 'static,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// `missing state means active` per spec.md §6.
    pub async fn fetch(&self, pairing_id: &str) -> Result<SessionControl> {
        let key = keys::session_control(pairing_id);
        match self.store.get(&key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SessionControl::active_default()),
        }
    }

    /// Apply `stop`/`resume`/`clear`. `stop` is a no-op if already paused.
    /// `Ended` sessions reject any further interrupt.
    pub async fn interrupt(&self, pairing_id: &str, action: InterruptAction) -> Result<SessionControl> {
        let key = keys::session_control(pairing_id);
        let ttl = std::time::Duration::from_secs(CONTROL_TTL_SECS);

        let mut result: Option<SessionControl> = None;
        retry_cas(&self.store, &key, Some(ttl), 3, |current| {
            let mut state = match current {
                Some(bytes) => serde_json::from_slice::<SessionControl>(bytes)?,
                None => SessionControl::active_default(),
            };

            if !state.active {
                return Err(Error::InvalidInput(
                    "session has ended; a new pair is required".into(),
                ));
            }

            match action {
                InterruptAction::Stop => {
                    state.interrupted = true;
                    state.interrupt_action = Some(InterruptAction::Stop);
                }
                InterruptAction::Resume | InterruptAction::Clear => {
                    state.interrupted = false;
                    state.interrupt_action = None;
                }
            }
            state.updated_at = Utc::now();
            result = Some(state.clone());
            Ok(Some(serde_json::to_vec(&state)?))
        })
        .await?;

        Ok(result.expect("set on every successful retry_cas branch"))
    }

    /// Transition to `Ended`. The caller is responsible for draining queues.
    pub async fn end(&self, pairing_id: &str) -> Result<()> {
        let key = keys::session_control(pairing_id);
        let ttl = std::time::Duration::from_secs(CONTROL_TTL_SECS);

        retry_cas(&self.store, &key, Some(ttl), 3, |_current| {
            let state = SessionControl {
                active: false,
                interrupted: false,
                interrupt_action: None,
                updated_at: Utc::now(),
            };
            Ok(Some(serde_json::to_vec(&state)?))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn store() -> ControlStore<MemoryKv> {
        ControlStore::new(MemoryKv::new())
    }

    #[tokio::test]
    async fn missing_state_is_active() {
        let s = store();
        let state = s.fetch("p1").await.unwrap();
        assert!(state.active);
        assert!(!state.interrupted);
    }

    #[tokio::test]
    async fn stop_then_resume_round_trips() {
        let s = store();
        let stopped = s.interrupt("p1", InterruptAction::Stop).await.unwrap();
        assert!(stopped.interrupted);

        let resumed = s.interrupt("p1", InterruptAction::Resume).await.unwrap();
        assert!(!resumed.interrupted);
    }

    #[tokio::test]
    async fn stop_twice_is_noop() {
        let s = store();
        s.interrupt("p1", InterruptAction::Stop).await.unwrap();
        let again = s.interrupt("p1", InterruptAction::Stop).await.unwrap();
        assert!(again.interrupted);
    }

    #[tokio::test]
    async fn ended_session_rejects_interrupt() {
        let s = store();
        s.end("p1").await.unwrap();
        let err = s.interrupt("p1", InterruptAction::Stop).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
