//! Service discovery using mDNS/DNS-SD
//!
//! Advertises a locally running relay on the local network so a bridge or
//! watch app can discover it without manual configuration.

pub mod mdns;

pub use mdns::MdnsAdvertiser;
