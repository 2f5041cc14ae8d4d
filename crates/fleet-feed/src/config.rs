//! # Feed Configuration
//!
//! Where the feed lives and how hard it tries to stay connected.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FLEET_API_URL=https://fleet.example.com                            │
//! │     FLEET_FEED_PATH=/api/fleet/live                                    │
//! │     FLEET_MAX_RECONNECT_ATTEMPTS=10                                    │
//! │     FLEET_AUTO_CONNECT=false                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dashboard/feed.toml (Linux)                              │
//! │     ~/Library/Application Support/com.fleet.dashboard/feed.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     http://localhost:8000, 1 s → 30 s backoff, unlimited retries       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # feed.toml
//! [endpoint]
//! api_url = "https://fleet.example.com"
//! feed_path = "/api/fleet/live"
//! connect_timeout_secs = 10
//! ping_interval_secs = 30
//! keepalive_secs = 25
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 0   # 0 = retry forever
//! multiplier = 2.0
//! auto_connect = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::ChannelConfig;
use crate::error::{FeedError, FeedResult};
use crate::transport::WebSocketConnector;

// =============================================================================
// Endpoint Settings
// =============================================================================

/// Where the feed server lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// HTTP(S) base URL of the backend. Mapped to ws/wss for the feed.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Path of the live feed on the backend.
    #[serde(default = "default_feed_path")]
    pub feed_path: String,

    /// Handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// WebSocket protocol ping interval (seconds, 0 = off).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Interval for application-level `ping` messages (seconds, 0 = off).
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_feed_path() -> String {
    fleet_core::FEED_PATH.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    30
}

fn default_keepalive() -> u64 {
    25
}

impl Default for EndpointSettings {
    fn default() -> Self {
        EndpointSettings {
            api_url: default_api_url(),
            feed_path: default_feed_path(),
            connect_timeout_secs: default_connect_timeout(),
            ping_interval_secs: default_ping_interval(),
            keepalive_secs: default_keepalive(),
        }
    }
}

// =============================================================================
// Reconnect Settings
// =============================================================================

/// Backoff settings for the feed channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Retries before giving up. Set to 0 for infinite retries.
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        ReconnectSettings {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: 0,
            multiplier: default_multiplier(),
            auto_connect: true,
        }
    }
}

// =============================================================================
// Main Feed Configuration
// =============================================================================

/// Complete feed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub endpoint: EndpointSettings,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl FeedConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (feed.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> FeedResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => Self::read(&path)?,
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load feed config: {}. Using defaults.", e);
            Self::default()
        })
    }

    fn read(path: &Path) -> FeedResult<Self> {
        info!(?path, "Loading feed config from file");
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> FeedResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| FeedError::ConfigSaveFailed("No config path available".into()))?;

        // Serialize first so a bad value never truncates the file.
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FeedError::ConfigSaveFailed(e.to_string()))?;
        }
        std::fs::write(&path, contents).map_err(|e| FeedError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Feed config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FeedResult<()> {
        self.feed_url()?;
        self.channel_config().validate()?;

        if self.endpoint.connect_timeout_secs == 0 {
            return Err(FeedError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from `lookup`, normally the process environment.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FLEET_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.endpoint.api_url = url;
        }

        if let Some(path) = lookup("FLEET_FEED_PATH") {
            self.endpoint.feed_path = path;
        }

        if let Some(attempts) = lookup("FLEET_MAX_RECONNECT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.reconnect.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid FLEET_MAX_RECONNECT_ATTEMPTS"),
            }
        }

        if let Some(auto) = lookup("FLEET_AUTO_CONNECT") {
            match auto.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.reconnect.auto_connect = true,
                "0" | "false" | "no" | "off" => self.reconnect.auto_connect = false,
                _ => warn!(value = %auto, "Ignoring invalid FLEET_AUTO_CONNECT"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fleet", "dashboard")
            .map(|dirs| dirs.config_dir().join("feed.toml"))
    }

    // =========================================================================
    // Derived Settings
    // =========================================================================

    /// WebSocket URL of the live feed: `api_url` with http→ws, https→wss and
    /// the feed path appended.
    pub fn feed_url(&self) -> FeedResult<Url> {
        let mut url = Url::parse(&self.endpoint.api_url)?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(FeedError::InvalidUrl(format!(
                    "API URL must be http(s) or ws(s), got scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| FeedError::InvalidUrl(format!("cannot use {} with {}", scheme, url)))?;

        let base = url.path().trim_end_matches('/').to_string();
        let path = self.endpoint.feed_path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", base, path));

        Ok(url)
    }

    /// Reconnect behaviour for the feed channel.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
            multiplier: self.reconnect.multiplier,
            auto_connect: self.reconnect.auto_connect,
        }
    }

    /// WebSocket connector with the configured timeouts.
    pub fn connector(&self) -> WebSocketConnector {
        WebSocketConnector {
            connect_timeout: Duration::from_secs(self.endpoint.connect_timeout_secs),
            ping_interval: Duration::from_secs(self.endpoint.ping_interval_secs),
        }
    }

    /// Interval for application-level pings, if enabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.endpoint.keepalive_secs > 0).then(|| Duration::from_secs(self.endpoint.keepalive_secs))
    }
}
