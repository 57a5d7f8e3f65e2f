//! Configuration: environment-over-file-over-defaults layering, grounded
//! on the teacher's `Config::load_with_options` pattern (file config as the
//! base layer, each field re-checked against a `CLAUDE_WATCH_*` env var).

pub mod file;

use std::path::PathBuf;

use crate::Result;

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub relay: RelaySettings,
    pub bridge: BridgeSettings,
    pub push: PushSettings,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub port: u16,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub relay_url: String,
    pub local_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub provider_endpoint: Option<String>,
    pub issuer: String,
    pub signing_key_path: Option<PathBuf>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { port: 8787, rate_limit_per_minute: 60 }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self { relay_url: "http://localhost:8787".to_string(), local_fallback: false }
    }
}

impl Default for PushSettings {
    fn default() -> Self {
        Self { provider_endpoint: None, issuer: "claude-watch".to_string(), signing_key_path: None }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid by `~/.config/claude-watch/config.toml`,
    /// overlaid by `CLAUDE_WATCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Never fails today (a missing/malformed file falls back to defaults)
    /// but returns `Result` since a future validation pass may reject an
    /// inconsistent configuration.
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();

        let relay = RelaySettings {
            port: std::env::var("CLAUDE_WATCH_RELAY_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(fc.relay.port)
                .unwrap_or(RelaySettings::default().port),
            rate_limit_per_minute: std::env::var("CLAUDE_WATCH_RATE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(fc.relay.rate_limit_per_minute)
                .unwrap_or(RelaySettings::default().rate_limit_per_minute),
        };

        let bridge = BridgeSettings {
            relay_url: std::env::var("CLAUDE_WATCH_RELAY_URL")
                .ok()
                .or(fc.bridge.relay_url)
                .unwrap_or_else(|| BridgeSettings::default().relay_url),
            local_fallback: std::env::var("CLAUDE_WATCH_LOCAL_FALLBACK")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.bridge.local_fallback)
                .unwrap_or(false),
        };

        let push = PushSettings {
            provider_endpoint: std::env::var("CLAUDE_WATCH_PUSH_ENDPOINT")
                .ok()
                .or(fc.push.provider_endpoint),
            issuer: std::env::var("CLAUDE_WATCH_PUSH_ISSUER")
                .ok()
                .or(fc.push.issuer)
                .unwrap_or_else(|| PushSettings::default().issuer),
            signing_key_path: std::env::var("CLAUDE_WATCH_PUSH_KEY_PATH")
                .ok()
                .or(fc.push.signing_key_path)
                .map(PathBuf::from),
        };

        let data_dir = std::env::var("CLAUDE_WATCH_DATA_DIR").map_or_else(
            |_| {
                directories::BaseDirs::new()
                    .map(|d| d.data_dir().join("claude-watch"))
                    .unwrap_or_else(|| PathBuf::from(".claude-watch"))
            },
            PathBuf::from,
        );

        Ok(Self { relay, bridge, push, data_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env_or_file() {
        // SAFETY-in-spirit: this test only reads env vars it doesn't set;
        // it relies on the ambient test environment not setting CLAUDE_WATCH_*.
        let config = Config::load().unwrap();
        assert_eq!(config.relay.port, 8787);
        assert!(!config.bridge.local_fallback);
        assert_eq!(config.push.issuer, "claude-watch");
    }
}
