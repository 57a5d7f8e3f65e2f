//! Client sync core: the cooperative state machine a watch app embeds to
//! stay in sync with the relay — reconnect/backoff, a priority outbox,
//! optimistic-update reconciliation, and progress-update batching, all
//! exactly as specified (spec.md §4.7). One `SyncCore` per pairing.
//!
//! This module is deliberately transport-agnostic: `SyncCore<T>` is
//! exercised directly against a fake `Transport` in tests, and driven by
//! `transport::Polling`/`transport::Streaming` in production.

pub mod transport;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::queues::progress::ProgressSnapshot;
use crate::queues::question::Answer;

pub use transport::Transport;

/// Bound on the outbox (spec.md §4.7).
const OUTBOX_CAPACITY: usize = 50;

/// 2 s activity-batcher coalescing window (spec.md §4.7).
const BATCH_WINDOW: Duration = Duration::from_secs(2);

/// How long a snapshot may go un-refreshed before it's considered stale.
const STALE_IN_PROGRESS: Duration = Duration::from_secs(300);
const STALE_COMPLETE: Duration = Duration::from_secs(3);

/// The reconnect/handshake state machine (spec.md §4.7 diagram).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, next_in: Duration },
}

/// Outbound message priority. Declaration order is sort order: `High`
/// sorts before `Normal` before `Low`, matching the flush-in-priority-order
/// requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A message queued toward the relay while disconnected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Approve { pairing_id: String, id: String },
    Reject { pairing_id: String, id: String },
    QuestionAnswer { pairing_id: String, question_id: String, answer: AnswerKey },
    ModeChanged { pairing_id: String, mode: PairingMode },
    StateRequest { pairing_id: String },
}

/// `Answer` isn't `Eq` (it wraps `usize`/`String`, which are, but deriving
/// through an external type kept this local rather than widening
/// `queues::question::Answer`'s derives for a single caller).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AnswerKey {
    HandleOnMac,
    Single(usize),
    Multiple(Vec<usize>),
}

impl From<&Answer> for AnswerKey {
    fn from(answer: &Answer) -> Self {
        match answer {
            Answer::HandleOnMac(_) => Self::HandleOnMac,
            Answer::Single(idx) => Self::Single(*idx),
            Answer::Multiple(indices) => Self::Multiple(indices.clone()),
        }
    }
}

impl OutboundMessage {
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self {
            Self::Approve { .. } | Self::Reject { .. } => Priority::High,
            Self::ModeChanged { .. } | Self::QuestionAnswer { .. } => Priority::Normal,
            Self::StateRequest { .. } => Priority::Low,
        }
    }
}

/// Manual vs auto-accept pairing mode (spec.md §4.7 auto-accept policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PairingMode {
    Manual,
    AutoAccept,
}

/// Bounded priority queue with the spec's overflow policy: drop the oldest
/// `low`-priority entry first; only once none remain does it drop the
/// oldest entry regardless of priority.
#[derive(Debug, Default)]
pub struct Outbox {
    items: VecDeque<OutboundMessage>,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    pub fn push(&mut self, message: OutboundMessage) {
        if self.items.len() >= OUTBOX_CAPACITY {
            self.evict_one();
        }
        self.items.push_back(message);
    }

    fn evict_one(&mut self) {
        if let Some(pos) = self.items.iter().position(|m| m.priority() == Priority::Low) {
            self.items.remove(pos);
        } else {
            self.items.pop_front();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain the outbox, returning messages in priority order (stable
    /// within a priority, so FIFO is preserved among equal priorities).
    pub fn drain_in_priority_order(&mut self) -> Vec<OutboundMessage> {
        let mut drained: Vec<_> = self.items.drain(..).collect();
        drained.sort_by_key(OutboundMessage::priority);
        drained
    }
}

/// Tracks ids resolved locally within the last `RECENT_RESOLUTION_WINDOW`,
/// so a stale poll response that still lists them as pending is ignored
/// instead of re-adding them to the visible list.
#[derive(Debug, Default)]
pub struct ReconciliationWindow {
    resolved: HashMap<String, Instant>,
    window: Duration,
}

impl ReconciliationWindow {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { resolved: HashMap::new(), window }
    }

    pub fn record_resolved(&mut self, id: impl Into<String>) {
        self.resolved.insert(id.into(), Instant::now());
    }

    #[must_use]
    pub fn is_recently_resolved(&self, id: &str) -> bool {
        self.resolved
            .get(id)
            .is_some_and(|recorded| recorded.elapsed() < self.window)
    }

    /// Drop entries past the window; called periodically, not on every read.
    pub fn prune(&mut self) {
        let window = self.window;
        self.resolved.retain(|_, recorded| recorded.elapsed() < window);
    }
}

/// Coalesces high-frequency progress updates: the latest snapshot in a
/// 2 s window wins, intermediate ones are discarded.
#[derive(Debug, Default)]
pub struct ActivityBatcher {
    window: Duration,
    pending: Option<ProgressSnapshot>,
    deadline: Option<Instant>,
}

impl ActivityBatcher {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, pending: None, deadline: None }
    }

    /// Replace the pending snapshot; starts the window on the first
    /// ingest since the last flush.
    pub fn ingest(&mut self, snapshot: ProgressSnapshot) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
        self.pending = Some(snapshot);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Take the pending snapshot unconditionally — used both for the
    /// window-elapsed case and for the foreground/shutdown immediate flush.
    pub fn flush(&mut self) -> Option<ProgressSnapshot> {
        self.deadline = None;
        self.pending.take()
    }
}

/// True if a progress snapshot observed `age` ago has gone stale (spec.md
/// §4.7 staleness rule: 300 s in-progress, 3 s once complete).
#[must_use]
pub fn is_stale(snapshot: &ProgressSnapshot, age: Duration) -> bool {
    if snapshot.is_complete() {
        age >= STALE_COMPLETE
    } else {
        age >= STALE_IN_PROGRESS
    }
}

/// The sync core itself: one per pairing, driven by a cooperative caller
/// (a single task owns it — see spec.md §5's "single-writer" resource rule).
pub struct SyncCore<T> {
    transport: T,
    state: ConnectionState,
    outbox: Outbox,
    batcher: ActivityBatcher,
    reconciliation: ReconciliationWindow,
    mode: PairingMode,
    visible_pending: Vec<String>,
    retry_attempt: u32,
}

impl<T> SyncCore<T> {
    /// The optimistic-reconciliation retention window (spec.md §4.7: "≤ 60 s").
    pub const RECENT_RESOLUTION_WINDOW: Duration = Duration::from_secs(60);

    /// Reconnect attempt ceiling shared with the bridge's backoff helper.
    pub const MAX_RETRIES: u32 = crate::backoff::MAX_RETRIES;

    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            outbox: Outbox::new(),
            batcher: ActivityBatcher::new(BATCH_WINDOW),
            reconciliation: ReconciliationWindow::new(Self::RECENT_RESOLUTION_WINDOW),
            mode: PairingMode::Manual,
            visible_pending: Vec::new(),
            retry_attempt: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub const fn mode(&self) -> PairingMode {
        self.mode
    }

    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub fn visible_pending(&self) -> &[String] {
        &self.visible_pending
    }

    /// Reset the retry counter to zero. Triggered by (a) a network-reachability
    /// observer transitioning to "available", (b) an app foreground
    /// transition, or (c) a successful handshake.
    pub fn reset_backoff(&mut self) {
        self.retry_attempt = 0;
    }

    /// Record a failed (or timed-out) handshake attempt and compute the
    /// next state: `Reconnecting` with the backoff delay for this attempt,
    /// or `Disconnected` once `MAX_RETRIES` is exhausted.
    pub fn record_handshake_failure(&mut self) -> &ConnectionState {
        if self.retry_attempt >= Self::MAX_RETRIES {
            self.state = ConnectionState::Disconnected;
            self.retry_attempt = 0;
        } else {
            self.state = ConnectionState::Reconnecting {
                attempt: self.retry_attempt,
                next_in: crate::backoff::delay(self.retry_attempt),
            };
            self.retry_attempt += 1;
        }
        &self.state
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reset_backoff();
    }

    /// Observe a pending approval id from a poll/push. Returns `true` if
    /// the UI should surface it, `false` if it was resolved locally within
    /// the reconciliation window and must not reappear.
    pub fn observe_pending(&mut self, id: &str, pairing_id: &str) -> bool {
        if self.reconciliation.is_recently_resolved(id) {
            return false;
        }
        if !self.visible_pending.iter().any(|existing| existing == id) {
            self.visible_pending.push(id.to_string());
        }

        if self.mode == PairingMode::AutoAccept {
            self.resolve_locally(id, true, pairing_id);
        }
        true
    }

    /// Resolve an action locally: remove it from the visible list
    /// immediately, enqueue the response at `high` priority, and remember
    /// it so a stale poll can't re-add it within the reconciliation window.
    pub fn resolve_locally(&mut self, id: &str, approved: bool, pairing_id: &str) {
        self.visible_pending.retain(|existing| existing != id);
        self.reconciliation.record_resolved(id);
        let message = if approved {
            OutboundMessage::Approve { pairing_id: pairing_id.to_string(), id: id.to_string() }
        } else {
            OutboundMessage::Reject { pairing_id: pairing_id.to_string(), id: id.to_string() }
        };
        self.outbox.push(message);
    }

    /// Mode transitions into `auto-accept` trigger an immediate
    /// approve-all over the current pending set.
    pub fn set_mode(&mut self, mode: PairingMode, pairing_id: &str) {
        let entering_auto_accept = mode == PairingMode::AutoAccept && self.mode != PairingMode::AutoAccept;
        self.mode = mode;
        if entering_auto_accept {
            for id in std::mem::take(&mut self.visible_pending) {
                self.reconciliation.record_resolved(id.clone());
                self.outbox.push(OutboundMessage::Approve {
                    pairing_id: pairing_id.to_string(),
                    id,
                });
            }
        }
    }

    pub fn ingest_progress(&mut self, snapshot: ProgressSnapshot) {
        self.batcher.ingest(snapshot);
    }

    /// Flush the activity batcher if its window has elapsed.
    pub fn flush_progress_if_ready(&mut self) -> Option<ProgressSnapshot> {
        if self.batcher.is_ready() {
            self.batcher.flush()
        } else {
            None
        }
    }

    /// Flush the activity batcher immediately, bypassing the window — used
    /// on foreground entry and shutdown.
    pub fn flush_progress_now(&mut self) -> Option<ProgressSnapshot> {
        self.batcher.flush()
    }

    pub fn prune_reconciliation(&mut self) {
        self.reconciliation.prune();
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(priority: Priority) -> OutboundMessage {
        match priority {
            Priority::High => OutboundMessage::Approve { pairing_id: "p".into(), id: "a".into() },
            Priority::Normal => OutboundMessage::ModeChanged {
                pairing_id: "p".into(),
                mode: PairingMode::Manual,
            },
            Priority::Low => OutboundMessage::StateRequest { pairing_id: "p".into() },
        }
    }

    #[test]
    fn outbox_drains_in_priority_order() {
        let mut outbox = Outbox::new();
        outbox.push(msg(Priority::Low));
        outbox.push(msg(Priority::High));
        outbox.push(msg(Priority::Normal));

        let drained = outbox.drain_in_priority_order();
        assert_eq!(drained[0].priority(), Priority::High);
        assert_eq!(drained[1].priority(), Priority::Normal);
        assert_eq!(drained[2].priority(), Priority::Low);
    }

    #[test]
    fn overflow_drops_oldest_low_before_touching_high() {
        let mut outbox = Outbox::new();
        for _ in 0..OUTBOX_CAPACITY {
            outbox.push(msg(Priority::High));
        }
        outbox.push(msg(Priority::Low));
        assert_eq!(outbox.len(), OUTBOX_CAPACITY + 1);

        // One more push must evict the just-added Low, not any High.
        outbox.push(msg(Priority::High));
        let drained = outbox.drain_in_priority_order();
        assert_eq!(drained.len(), OUTBOX_CAPACITY + 1);
        assert!(drained.iter().all(|m| m.priority() == Priority::High));
    }

    #[test]
    fn overflow_drops_oldest_regardless_once_no_low_remains() {
        let mut outbox = Outbox::new();
        for _ in 0..OUTBOX_CAPACITY {
            outbox.push(msg(Priority::High));
        }
        // Full of exclusively-high entries: the next push must evict one.
        outbox.push(msg(Priority::High));
        assert_eq!(outbox.len(), OUTBOX_CAPACITY);
    }

    #[test]
    fn reconciliation_window_suppresses_recent_id() {
        let mut window = ReconciliationWindow::new(Duration::from_secs(60));
        window.record_resolved("a1");
        assert!(window.is_recently_resolved("a1"));
        assert!(!window.is_recently_resolved("a2"));
    }

    #[test]
    fn batcher_latest_wins_within_window() {
        let mut batcher = ActivityBatcher::new(Duration::from_millis(50));
        batcher.ingest(snapshot(0.1));
        batcher.ingest(snapshot(0.5));
        assert!(!batcher.is_ready());
        let flushed = batcher.flush();
        assert!((flushed.unwrap().progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn batcher_becomes_ready_after_window_elapses() {
        let mut batcher = ActivityBatcher::new(Duration::from_secs(2));
        batcher.ingest(snapshot(0.3));
        assert!(!batcher.is_ready());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(batcher.is_ready());
    }

    fn snapshot(progress: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            current_task: None,
            current_activity: None,
            progress,
            completed_count: 0,
            total_count: 0,
            elapsed_seconds: 0,
            tasks: Vec::new(),
            outcome: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn auto_accept_resolves_new_pending_immediately() {
        let mut core = SyncCore::new(());
        core.set_mode(PairingMode::AutoAccept, "p1");
        assert!(core.observe_pending("a1", "p1"));
        assert!(core.visible_pending().is_empty());
        assert_eq!(core.outbox().len(), 1);
    }

    #[test]
    fn entering_auto_accept_approves_existing_pending_set() {
        let mut core = SyncCore::new(());
        core.mode = PairingMode::Manual;
        core.visible_pending.push("a1".into());
        core.visible_pending.push("a2".into());

        core.set_mode(PairingMode::AutoAccept, "p1");

        assert!(core.visible_pending().is_empty());
        assert_eq!(core.outbox().len(), 2);
    }

    #[test]
    fn resolve_locally_removes_from_visible_and_enqueues_high_priority() {
        let mut core = SyncCore::new(());
        core.visible_pending.push("a1".into());

        core.resolve_locally("a1", true, "p1");

        assert!(core.visible_pending().is_empty());
        let drained = core.outbox.drain_in_priority_order();
        assert_eq!(drained[0].priority(), Priority::High);
    }

    #[test]
    fn staleness_uses_shorter_window_once_complete() {
        let in_progress = snapshot(0.4);
        let complete = ProgressSnapshot { progress: 1.0, ..snapshot(1.0) };

        assert!(!is_stale(&in_progress, Duration::from_secs(4)));
        assert!(is_stale(&in_progress, Duration::from_secs(301)));
        assert!(is_stale(&complete, Duration::from_secs(4)));
    }

    #[test]
    fn handshake_failures_escalate_attempt_then_give_up() {
        let mut core = SyncCore::new(());
        for expected in 0..SyncCore::<()>::MAX_RETRIES {
            match core.record_handshake_failure() {
                ConnectionState::Reconnecting { attempt, .. } => assert_eq!(*attempt, expected),
                other => panic!("expected Reconnecting, got {other:?}"),
            }
        }
        assert_eq!(*core.record_handshake_failure(), ConnectionState::Disconnected);
    }
}
