//! # Configuration
//!
//! [`HubConfig`] holds everything needed to reach the NeuroplayPro hub and
//! the timing constants of the discovery/start/grab polling loops.
//!
//! ## Loading Priority
//!
//! Configuration is loaded from the first source that provides a value:
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. TOML config file at an explicit path
//! 3. `NEUROPLAY_CONFIG` environment variable pointing at a file
//! 4. `./neuroplay.toml` in the current directory
//! 5. `~/.config/neuroplay/neuroplay.toml`
//! 6. Defaults
//!
//! `NEUROPLAY_HUB_URL` and `NEUROPLAY_GRAB_INTERVAL_MS` always override
//! file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NeuroplayError, NeuroplayResult};

/// Default hub WebSocket URL.
pub const DEFAULT_HUB_URL: &str = "ws://localhost:1336";

/// Default period of the `listdevices` discovery poll, in milliseconds.
const DEFAULT_DISCOVERY_POLL_MS: u64 = 200;

/// Default length of the discovery window, in milliseconds.
const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 6000;

/// Default period of the `currentdeviceinfo` start poll, in milliseconds.
const DEFAULT_START_POLL_MS: u64 = 200;

/// Default length of the device-start window, in milliseconds.
const DEFAULT_START_TIMEOUT_MS: u64 = 6000;

/// Default grab-mode polling period, in milliseconds.
const DEFAULT_GRAB_INTERVAL_MS: u64 = 50;

/// Default WebSocket connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default capacity of the notification broadcast channel.
const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Default capacity of the request channel into the event loop.
const DEFAULT_REQUEST_BUFFER: usize = 64;

/// Configuration for connecting to the NeuroplayPro hub.
///
/// # Examples
///
/// ```
/// use neuroplay_pro::config::HubConfig;
///
/// let mut config = HubConfig::default();
/// config.hub_url = "ws://127.0.0.1:1336".into();
/// assert_eq!(config.timings.grab_interval_ms, 50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// WebSocket URL of the hub.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// Polling periods and protocol windows.
    #[serde(default)]
    pub timings: TimingConfig,

    /// Transport and channel sizing.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Polling periods and the fixed windows that bound discovery and device start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Period of the `listdevices` poll while searching.
    #[serde(default = "default_discovery_poll")]
    pub discovery_poll_ms: u64,

    /// Searching always ends this long after it starts.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,

    /// Period of the `currentdeviceinfo` poll after `startdevice`.
    #[serde(default = "default_start_poll")]
    pub start_poll_ms: u64,

    /// The start poll is abandoned this long after `startdevice` is acknowledged.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,

    /// Initial grab-mode period for newly created device sessions.
    #[serde(default = "default_grab_interval")]
    pub grab_interval_ms: u64,
}

/// Transport settings for the async client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout for the WebSocket handshake, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Capacity of the notification broadcast channel. Slow subscribers
    /// that fall further behind than this lose the oldest notifications.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of the request channel into the event loop.
    #[serde(default = "default_request_buffer")]
    pub request_buffer: usize,
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_hub_url() -> String {
    DEFAULT_HUB_URL.to_string()
}

fn default_discovery_poll() -> u64 {
    DEFAULT_DISCOVERY_POLL_MS
}

fn default_discovery_timeout() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT_MS
}

fn default_start_poll() -> u64 {
    DEFAULT_START_POLL_MS
}

fn default_start_timeout() -> u64 {
    DEFAULT_START_TIMEOUT_MS
}

fn default_grab_interval() -> u64 {
    DEFAULT_GRAB_INTERVAL_MS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_request_buffer() -> usize {
    DEFAULT_REQUEST_BUFFER
}

// ─── Default impls ──────────────────────────────────────────────────────

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_poll_ms: DEFAULT_DISCOVERY_POLL_MS,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            start_poll_ms: DEFAULT_START_POLL_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            grab_interval_ms: DEFAULT_GRAB_INTERVAL_MS,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            request_buffer: DEFAULT_REQUEST_BUFFER,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            timings: TimingConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    #[must_use]
    pub fn start_poll(&self) -> Duration {
        Duration::from_millis(self.start_poll_ms)
    }

    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Initial grab-mode period of new device sessions.
    #[must_use]
    pub fn grab_interval(&self) -> Duration {
        Duration::from_millis(self.grab_interval_ms)
    }
}

// ─── HubConfig impl ────────────────────────────────────────────────────

impl HubConfig {
    /// Create a config for a specific hub URL (all other fields use defaults).
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            ..Self::default()
        }
    }

    /// Load config from environment variables on top of the defaults.
    ///
    /// Optional: `NEUROPLAY_HUB_URL`, `NEUROPLAY_GRAB_INTERVAL_MS`
    pub fn from_env() -> NeuroplayResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load config from a TOML file, with environment variable overrides.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> NeuroplayResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| NeuroplayError::ConfigError {
                reason: format!("Failed to read config file '{}': {}", path.display(), e),
            })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Discover and load config from the standard search path:
    ///
    /// 1. Explicit path (if `Some`)
    /// 2. `NEUROPLAY_CONFIG` environment variable
    /// 3. `./neuroplay.toml`
    /// 4. `~/.config/neuroplay/neuroplay.toml`
    ///
    /// Falls back to defaults plus environment overrides if no file is found.
    #[cfg(feature = "config-toml")]
    pub fn discover(explicit_path: Option<&Path>) -> NeuroplayResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var("NEUROPLAY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let local_path = PathBuf::from("neuroplay.toml");
        if local_path.exists() {
            return Self::from_file(&local_path);
        }

        if let Some(config_path) = dirs_config_path() {
            if config_path.exists() {
                return Self::from_file(&config_path);
            }
        }

        Self::from_env()
    }

    fn apply_env_overrides(&mut self) -> NeuroplayResult<()> {
        if let Ok(url) = std::env::var("NEUROPLAY_HUB_URL") {
            self.hub_url = url;
        }
        if let Ok(raw) = std::env::var("NEUROPLAY_GRAB_INTERVAL_MS") {
            self.timings.grab_interval_ms =
                raw.parse().map_err(|_| NeuroplayError::ConfigError {
                    reason: format!("NEUROPLAY_GRAB_INTERVAL_MS must be an integer, got '{raw}'"),
                })?;
        }
        Ok(())
    }

    /// WebSocket handshake timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// Platform-appropriate config file path.
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("neuroplay").join("neuroplay.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("neuroplay")
                .join("neuroplay.toml")
        })
    }
}
