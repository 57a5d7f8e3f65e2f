//! Claude Watch relay core — pairing, queues, crypto, and the permission
//! bridge that lets an AI coding CLI ask a smartwatch for permission.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   pair/poll/push   ┌──────────────┐   control protocol   ┌────────────┐
//! │  Watch app   │◀──────────────────▶│    Relay     │◀────────────────────│   Bridge   │── wraps ──▶ CLI tool
//! │ (sync::*)    │                    │ (api, kv,    │                     │ (bridge::*)│
//! └──────────────┘                    │  pairing,    │                     └────────────┘
//!                                     │  queues,     │
//!                                     │  push)       │
//!                                     └──────────────┘
//! ```
//!
//! `crypto` end-to-end seals payloads between watch and bridge; the relay
//! only ever sees ciphertext and public keys.

pub mod api;
pub mod backoff;
pub mod bridge;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod kv;
pub mod pairing;
pub mod push;
pub mod queues;
pub mod sync;
pub mod telemetry;

pub use bridge::Bridge;
pub use config::Config;
pub use crypto::{Cipher, Identity, KeyStore};
pub use error::{Error, Result};
pub use kv::{KvStore, MemoryKv};
pub use pairing::PairingRegistry;
pub use push::{PushDispatcher, PushHint};
pub use sync::SyncCore;
