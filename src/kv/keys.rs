//! Key-naming scheme for the KV fabric.
//!
//! Centralising key construction keeps the prefixes consistent across
//! `pairing` and `queues` and makes the namespace easy to audit.

/// Key for a `PairingSession` addressed by its pairing code.
#[must_use]
pub fn watch_code(code: &str) -> String {
    format!("watch_code:{code}")
}

/// Key for a `PairingSession` addressed by the watch's id.
#[must_use]
pub fn watch(watch_id: &str) -> String {
    format!("watch:{watch_id}")
}

/// Key for a `Connection` record.
#[must_use]
pub fn connection(pairing_id: &str) -> String {
    format!("connection:{pairing_id}")
}

/// Key for a pairing's approval queue (a JSON array of `ApprovalRequest`).
#[must_use]
pub fn approval_queue(pairing_id: &str) -> String {
    format!("approval_queue:{pairing_id}")
}

/// Key for a pairing's question queue (a JSON array of `QuestionRequest`).
#[must_use]
pub fn question_queue(pairing_id: &str) -> String {
    format!("question_queue:{pairing_id}")
}

/// Key for a pairing's `ProgressSnapshot`.
#[must_use]
pub fn progress(pairing_id: &str) -> String {
    format!("progress:{pairing_id}")
}

/// Key for a pairing's `SessionControl` state.
#[must_use]
pub fn session_control(pairing_id: &str) -> String {
    format!("session_control:{pairing_id}")
}
