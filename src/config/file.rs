//! TOML configuration file loading.
//!
//! Supports `~/.config/claude-watch/config.toml` as a persistent config
//! source. All fields are optional — the file is a partial overlay on top
//! of defaults, itself overlaid by environment variables.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub bridge: BridgeFileConfig,
    #[serde(default)]
    pub push: PushFileConfig,
}

/// Relay server configuration.
#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    pub port: Option<u16>,
    pub rate_limit_per_minute: Option<u32>,
}

/// Bridge (CLI-side) configuration.
#[derive(Debug, Default, Deserialize)]
pub struct BridgeFileConfig {
    pub relay_url: Option<String>,
    pub local_fallback: Option<bool>,
}

/// Push dispatcher configuration.
#[derive(Debug, Default, Deserialize)]
pub struct PushFileConfig {
    pub provider_endpoint: Option<String>,
    pub issuer: Option<String>,
    pub signing_key_path: Option<String>,
}

/// Load the TOML config file from the standard path.
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be
/// parsed; a missing or malformed file is never fatal, only logged.
#[must_use]
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            ConfigFile::default()
        }
    }
}

/// `~/.config/claude-watch/config.toml`.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("claude-watch").join("config.toml"))
}
