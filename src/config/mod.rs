use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{LivememoError, Result};
use crate::locator::{LocatorProfile, WaitOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub locator: LocatorConfig,

    #[serde(default)]
    pub hotkey: HotkeyConfig,

    #[serde(default)]
    pub cdp: CdpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage file path (defaults to the local data dir)
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Loopback port of the capture bridge
    #[serde(default = "default_bridge_port")]
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_bridge_port(),
        }
    }
}

fn default_bridge_port() -> u16 {
    19224
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// How long to wait for the time display after a press
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between lookups while waiting
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    #[serde(flatten)]
    pub profile: LocatorProfile,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            profile: LocatorProfile::default(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    8000
}

fn default_frame_interval_ms() -> u64 {
    16
}

impl LocatorConfig {
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            frame_interval: Duration::from_millis(self.frame_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    /// Single key that captures a timestamp
    #[serde(default = "default_hotkey")]
    pub key: String,

    /// How often the page is checked for presses
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            key: default_hotkey(),
            poll_ms: default_poll_ms(),
        }
    }
}

fn default_hotkey() -> String {
    "p".to_string()
}

fn default_poll_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpConfig {
    /// Remote debugging port of the browser showing the stream
    #[serde(default = "default_cdp_port")]
    pub port: u16,

    /// Only attach to tabs whose URL contains this
    #[serde(default = "default_url_filter")]
    pub url_filter: Option<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            port: default_cdp_port(),
            url_filter: default_url_filter(),
        }
    }
}

fn default_cdp_port() -> u16 {
    9222
}

fn default_url_filter() -> Option<String> {
    Some("chzzk.naver.com".to_string())
}

impl Config {
    /// Load configuration from all sources (file, env, defaults)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // LIVEMEMO_LOCATOR__TIMEOUT_MS -> locator.timeout_ms
            .merge(Env::prefixed("LIVEMEMO_").split("__"))
            .extract()
            .map_err(|e| LivememoError::ConfigError(e.to_string()))?;

        if config.hotkey.key.trim().chars().count() != 1 {
            return Err(LivememoError::ConfigError(format!(
                "hotkey.key must be a single key, got {:?}",
                config.hotkey.key
            )));
        }

        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("LIVEMEMO_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livememo")
            .join("config.toml")
    }

    /// Where memos and the offset live.
    pub fn storage_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("livememo")
                .join("storage.json"),
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| LivememoError::ConfigError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }
}
