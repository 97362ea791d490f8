//! Configuration loading and management
//!
//! The agent is configured in one of two ways:
//! - from the attributes of the `<script>` tag that loaded it (`data-url`,
//!   `data-id`, `data-disable-localhost`, ...), see [`ScriptTag`];
//! - from `~/.config/barelytics/config.toml` when driven natively by the CLI.
//!
//! Both produce raw [`AgentSettings`], which [`AgentSettings::validate`] turns
//! into the immutable [`AgentConfig`] the agent runs with.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/barelytics/` (~/.config/barelytics/)
//! - State/Logs: `$XDG_STATE_HOME/barelytics/` (~/.local/state/barelytics/)

use crate::error::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Collection endpoint used when `data-url` is absent
pub const DEFAULT_BACKEND_URL: &str = "https://api.barelytics.com/i";

/// Longest accepted replay flush interval (one day)
pub const MAX_FLUSH_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Agent settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Attributes of the `<script>` tag that loaded the agent
#[derive(Debug, Clone, Default)]
pub struct ScriptTag {
    attributes: HashMap<String, String>,
}

impl ScriptTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Read an attribute, as `getAttribute` would
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Raw, unvalidated agent settings
#[derive(Debug, Deserialize, Clone)]
pub struct AgentSettings {
    /// Collection endpoint (`data-url`)
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Client/tenant identifier (`data-id`), required
    #[serde(default)]
    pub client_id: Option<String>,

    /// Disable tracking on loopback/private hosts (`data-disable-localhost`)
    #[serde(default)]
    pub disable_localhost: bool,

    /// Separate endpoint for replay batches (`data-replay-url`)
    #[serde(default)]
    pub replay_url: Option<String>,

    /// Seconds between replay flushes (`data-flush-interval`)
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Emit page views on history navigation (`data-track-history`)
    #[serde(default = "default_track_history")]
    pub track_history: bool,

    /// HTTP request timeout in seconds for the native channel
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            backend_url: None,
            client_id: None,
            disable_localhost: false,
            replay_url: None,
            flush_interval_secs: default_flush_interval(),
            track_history: default_track_history(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_flush_interval() -> u64 {
    5
}

fn default_track_history() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl AgentSettings {
    /// Read settings from script-tag attributes
    ///
    /// Unparseable optional attributes fall back to their defaults.
    pub fn from_script_tag(tag: &ScriptTag) -> Self {
        let non_empty = |name: &str| {
            tag.attribute(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let flush_interval_secs = match tag.attribute("data-flush-interval") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| (1..=MAX_FLUSH_INTERVAL_SECS).contains(secs))
                .unwrap_or_else(|| {
                    tracing::warn!(value = %raw, "Ignoring invalid data-flush-interval");
                    default_flush_interval()
                }),
            None => default_flush_interval(),
        };

        Self {
            backend_url: non_empty("data-url"),
            client_id: non_empty("data-id"),
            disable_localhost: tag.attribute("data-disable-localhost") == Some("true"),
            replay_url: non_empty("data-replay-url"),
            flush_interval_secs,
            track_history: tag.attribute("data-track-history") != Some("false"),
            timeout_secs: default_timeout(),
        }
    }

    /// Check if the settings carry everything the agent needs
    pub fn is_ready(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate settings, producing the immutable agent configuration
    pub fn validate(&self) -> Result<AgentConfig> {
        let client_id = self
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Config("data-id attribute is required".to_string()))?
            .to_string();

        let backend_url = parse_endpoint(
            self.backend_url.as_deref().unwrap_or(DEFAULT_BACKEND_URL),
            "data-url",
        )?;

        let replay_url = self
            .replay_url
            .as_deref()
            .map(|raw| parse_endpoint(raw, "data-replay-url"))
            .transpose()?;

        if !(1..=MAX_FLUSH_INTERVAL_SECS).contains(&self.flush_interval_secs) {
            return Err(Error::Config(format!(
                "flush interval must be between 1 and {} seconds, got {}",
                MAX_FLUSH_INTERVAL_SECS, self.flush_interval_secs
            )));
        }

        Ok(AgentConfig {
            backend_url,
            replay_url,
            client_id,
            disable_localhost: self.disable_localhost,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            track_history: self.track_history,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

fn parse_endpoint(raw: &str, attribute: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid {} {:?}: {}", attribute, raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::Config(format!(
            "{} must be an http(s) URL, got scheme {:?}",
            attribute, scheme
        ))),
    }
}

/// Validated agent configuration, immutable for the lifetime of the page
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub backend_url: Url,
    pub replay_url: Option<Url>,
    pub client_id: String,
    pub disable_localhost: bool,
    pub flush_interval: Duration,
    pub track_history: bool,
    pub timeout: Duration,
}

impl AgentConfig {
    /// Endpoint that replay batches are posted to
    pub fn replay_endpoint(&self) -> &Url {
        self.replay_url.as_ref().unwrap_or(&self.backend_url)
    }

    /// Whether tracking is disabled for a page served from `hostname`
    pub fn is_disabled_for(&self, hostname: &str) -> bool {
        self.disable_localhost && crate::host::is_local_hostname(hostname)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/barelytics/config.toml` (~/.config/barelytics/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("barelytics").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/barelytics/` (~/.local/state/barelytics/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("barelytics")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("barelytics.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
