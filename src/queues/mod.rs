//! Per-pairing approval queue, question queue, progress snapshot, and
//! session-control state.
//!
//! Each repository is a thin wrapper over `kv::KvStore`, grounded on the
//! constructor-takes-the-store / methods-return-`crate::Result<T>` shape of
//! a CRUD repository, translated from rows to JSON-in-KV values.

pub mod approval;
pub mod control;
pub mod progress;
pub mod question;

/// Maximum number of pending entries retained per queue before the oldest
/// is pruned (spec: "capacity 50, oldest pruned").
pub(crate) const QUEUE_CAPACITY: usize = 50;

/// TTL applied to approval/question queue entries.
pub(crate) const QUEUE_TTL_SECS: u64 = 5 * 60;
