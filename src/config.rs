//! ATLINK runtime configuration handling

use crate::bridge::ws::DEFAULT_BRIDGE_URL;
use crate::device::DEFAULT_REQUESTER;
use crate::discovery::DEFAULT_PER_PAGE;
use crate::error::{Error, Result};
use crate::history::Network;
use crate::keyring::KeyringState;
use crate::path::{DEFAULT_HD_PATH, HdPath};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure persisted to disk or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlinkConfig {
    /// Bridge connection settings
    pub bridge: BridgeOptions,
    /// Account discovery settings
    pub discovery: DiscoveryOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
    /// Where the CLI keeps the serialized keyring
    pub state_file: StateFile,
}

impl AtlinkConfig {
    /// Load configuration from an explicit path or fall back to discovered defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else if let Some(path) = Self::discover_file()? {
            tracing::info!("Using configuration file: {}", path.display());
            Self::from_file(&path)?
        } else {
            tracing::debug!("No atlink.toml / atlink.yaml found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn discover_file() -> Result<Option<PathBuf>> {
        let cwd =
            env::current_dir().map_err(|e| Error::Config(format!("Failed to read cwd: {e}")))?;
        for candidate in ["atlink.toml", "atlink.yaml", "atlink.yml"] {
            let path = cwd.join(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME") {
            let base = PathBuf::from(xdg_config).join("atlink");
            for candidate in ["config.toml", "config.yaml"] {
                let path = base.join(candidate);
                if path.exists() {
                    return Ok(Some(path));
                }
            }
        }

        Ok(None)
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse TOML {}: {e}", path.display()))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config format '{other}', expected toml/yaml"
            ))),
        }
    }

    fn apply_env_overrides(&mut self) {
        self.bridge.apply_env_overrides();
        self.discovery.apply_env_overrides();
        self.logging.apply_env_overrides();
        if let Ok(path) = env::var("ATLINK_STATE_FILE") {
            if !path.trim().is_empty() {
                self.state_file = StateFile(PathBuf::from(path));
            }
        }
    }
}

/// Location of the persisted keyring state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateFile(pub PathBuf);

impl Default for StateFile {
    fn default() -> Self {
        Self(PathBuf::from("atlink-state.json"))
    }
}

impl StateFile {
    /// Path on disk
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Saved keyring state, or `None` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<KeyringState>> {
        if !self.0.exists() {
            tracing::debug!(path = %self.0.display(), "no saved keyring state");
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.0)?;
        let state = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("failed to parse keyring state {}: {e}", self.0.display()))
        })?;
        Ok(Some(state))
    }

    /// Write `state`, creating the parent directory if needed.
    pub fn save(&self, state: &KeyringState) -> Result<()> {
        if let Some(parent) = self.0.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| Error::Config(format!("failed to encode keyring state: {e}")))?;
        fs::write(&self.0, raw)?;
        tracing::debug!(path = %self.0.display(), "keyring state saved");
        Ok(())
    }
}

/// Bridge endpoint and exchange limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// WebSocket URL of the local bridge service
    pub url: String,
    /// Requester name sent with every command
    pub requester: String,
    /// Bound on the WebSocket handshake, in seconds
    pub connect_timeout_secs: u64,
    /// Optional bound on each request/response exchange, in seconds
    pub exchange_timeout_secs: Option<u64>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_BRIDGE_URL.to_string(),
            requester: DEFAULT_REQUESTER.to_string(),
            connect_timeout_secs: 10,
            exchange_timeout_secs: None,
        }
    }
}

impl BridgeOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("ATLINK_BRIDGE_URL") {
            self.url = url;
        }
        if let Ok(requester) = env::var("ATLINK_REQUESTER") {
            self.requester = requester;
        }
        if let Ok(timeout) = env::var("ATLINK_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.connect_timeout_secs = secs.max(1);
            }
        }
        if let Ok(timeout) = env::var("ATLINK_EXCHANGE_TIMEOUT") {
            self.exchange_timeout_secs = timeout.parse::<u64>().ok().filter(|secs| *secs > 0);
        }
    }

    /// Handshake bound
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Exchange bound, if any
    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Account discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Network whose explorer answers usage-history lookups
    #[serde(deserialize_with = "lenient_network")]
    pub network: Network,
    /// Optional Etherscan API key
    pub api_key: Option<String>,
    /// Accounts per discovery page
    pub per_page: u32,
    /// Initial HD path for unlock
    pub hd_path: String,
}

fn lenient_network<'de, D>(deserializer: D) -> std::result::Result<Network, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(Network::from_name(&name))
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            api_key: None,
            per_page: DEFAULT_PER_PAGE,
            hd_path: DEFAULT_HD_PATH.to_string(),
        }
    }
}

impl DiscoveryOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(network) = env::var("ATLINK_NETWORK") {
            self.network = Network::from_name(&network);
        }
        if let Ok(key) = env::var("ATLINK_ETHERSCAN_KEY") {
            self.api_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Ok(per_page) = env::var("ATLINK_PER_PAGE") {
            if let Ok(parsed) = per_page.parse::<u32>() {
                self.per_page = parsed.max(1);
            }
        }
        if let Ok(path) = env::var("ATLINK_HD_PATH") {
            self.hd_path = path;
        }
    }

    /// Parsed initial HD path
    pub fn hd_path(&self) -> Result<HdPath> {
        HdPath::parse(&self.hd_path)
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default log level (overridable via `ATLINK_LOG_LEVEL`)
    pub level: String,
    /// Optional log file path for teeing structured logs
    pub file: Option<PathBuf>,
    /// Force ANSI colors in terminal logging
    pub color: bool,
    /// Optional log rotation strategy applied to `file`
    pub rotation: Option<LogRotation>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            color: true,
            rotation: None,
        }
    }
}

impl LoggingOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("ATLINK_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(file) = env::var("ATLINK_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Ok(color) = env::var("ATLINK_LOG_COLOR") {
            match color.to_ascii_lowercase().as_str() {
                "0" | "false" | "off" => self.color = false,
                "1" | "true" | "on" => self.color = true,
                _ => {}
            }
        }
        if let Ok(rotation) = env::var("ATLINK_LOG_ROTATION") {
            if let Some(parsed) = LogRotation::from_name(&rotation) {
                self.rotation = Some(parsed);
            }
        }
    }
}

/// Supported log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl LogRotation {
    fn from_name(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }
}
