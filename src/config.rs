use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHANNEL, DEFAULT_KEY, MCAST_GRP, MCAST_PORT, USGS_HOST};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub bounds: BoundsConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Upstream feed parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed service hostname.
    #[serde(default = "default_host")]
    pub host: String,
    /// Minimum magnitude passed to every query.
    #[serde(default = "default_min_magnitude")]
    pub min_magnitude: f64,
    /// Result cap per query.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Geographic bounding box for feed queries, in decimal degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundsConfig {
    #[serde(default = "default_min_latitude")]
    pub min_latitude: f64,
    #[serde(default = "default_min_longitude")]
    pub min_longitude: f64,
    #[serde(default = "default_max_latitude")]
    pub max_latitude: f64,
    #[serde(default = "default_max_longitude")]
    pub max_longitude: f64,
}

/// Mesh radio parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Multicast group (or unicast address, useful in tests).
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mesh channel name carried on every packet.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Mesh channel key (base64) carried on every packet.
    #[serde(default = "default_channel_key")]
    pub key: String,
    /// Delay between consecutive outbound sends, in seconds.
    #[serde(default = "default_pacing_secs")]
    pub pacing_secs: u64,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Polling interval in seconds between feed queries.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_host() -> String {
    USGS_HOST.to_string()
}

fn default_min_magnitude() -> f64 {
    2.0
}

fn default_limit() -> u32 {
    50
}

fn default_min_latitude() -> f64 {
    33.0
}

fn default_min_longitude() -> f64 {
    -120.0
}

fn default_max_latitude() -> f64 {
    35.0
}

fn default_max_longitude() -> f64 {
    -116.0
}

fn default_group() -> String {
    MCAST_GRP.to_string()
}

fn default_port() -> u16 {
    MCAST_PORT
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_channel_key() -> String {
    DEFAULT_KEY.to_string()
}

fn default_pacing_secs() -> u64 {
    3
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            min_magnitude: default_min_magnitude(),
            limit: default_limit(),
        }
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min_latitude: default_min_latitude(),
            min_longitude: default_min_longitude(),
            max_latitude: default_max_latitude(),
            max_longitude: default_max_longitude(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            channel: default_channel(),
            key: default_channel_key(),
            pacing_secs: default_pacing_secs(),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            bounds: BoundsConfig::default(),
            radio: RadioConfig::default(),
            settings: SettingsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config from the given path, or fall back to defaults when the
    /// file does not exist. A file that exists but fails to parse is still
    /// an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides on top of the loaded config.
    /// Unset variables leave the config untouched; unparsable values are an
    /// error.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(host) = read_env("USGS_HOST")? {
            self.feed.host = host;
        }
        if let Some(v) = read_env_f64("EARTHQUAKE_MIN_LATITUDE")? {
            self.bounds.min_latitude = v;
        }
        if let Some(v) = read_env_f64("EARTHQUAKE_MIN_LONGITUDE")? {
            self.bounds.min_longitude = v;
        }
        if let Some(v) = read_env_f64("EARTHQUAKE_MAX_LATITUDE")? {
            self.bounds.max_latitude = v;
        }
        if let Some(v) = read_env_f64("EARTHQUAKE_MAX_LONGITUDE")? {
            self.bounds.max_longitude = v;
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {name}")),
    }
}

fn read_env_f64(name: &str) -> Result<Option<f64>> {
    match read_env(name)? {
        Some(value) => {
            let parsed = value
                .parse::<f64>()
                .with_context(|| format!("{name} is not a number: {value}"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
