//! Configuration system for the Peerwire CLI.

use peerwire_core::{TransceiverConfig, validate_service_type};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Peerwire configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Local peer configuration
    #[serde(default)]
    pub peer: PeerConfig,
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Received resources
    #[serde(default)]
    pub resources: ResourcesConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local peer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PeerConfig {
    /// Display name; falls back to the host name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Service type peers advertise and browse for
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Metadata broadcast with the advertisement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, String>,
}

/// Limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Seconds an invitation waits for an answer
    #[serde(default = "default_invite_timeout_secs")]
    pub invite_timeout_secs: u64,
    /// Largest encoded event accepted or sent
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,
}

/// Received resource storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Directory received resources are written under
    #[serde(default = "default_resource_dir")]
    pub dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_service_type() -> String {
    "peerwire".to_string()
}

fn default_invite_timeout_secs() -> u64 {
    peerwire_transport::DEFAULT_INVITE_TIMEOUT_SECS
}

fn default_max_event_size() -> usize {
    peerwire_core::DEFAULT_MAX_EVENT_SIZE
}

fn default_resource_dir() -> PathBuf {
    std::env::temp_dir().join("peerwire")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            info: BTreeMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            invite_timeout_secs: default_invite_timeout_secs(),
            max_event_size: default_max_event_size(),
        }
    }
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            dir: default_resource_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("peerwire/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Library configuration for one transceiver
    #[must_use]
    pub fn transceiver_config(&self) -> TransceiverConfig {
        let mut config = TransceiverConfig {
            invite_timeout: Duration::from_secs(self.limits.invite_timeout_secs),
            max_event_size: self.limits.max_event_size,
            ..TransceiverConfig::default()
        };
        if let Some(name) = &self.peer.display_name {
            config.display_name = name.clone();
        }
        config
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_service_type(&self.discovery.service_type)?;

        for (key, value) in &self.discovery.info {
            if key.is_empty() {
                anyhow::bail!("Discovery info contains an empty key");
            }
            if key.len() + value.len() > 255 {
                anyhow::bail!("Discovery info entry '{}' exceeds 255 bytes", key);
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            );
        }

        self.transceiver_config().validate()?;
        Ok(())
    }
}
