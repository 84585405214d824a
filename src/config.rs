//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating daemon configuration.

use crate::error::ConfigError;
use crate::estimator::RateDefaults;
use crate::gauge::Thresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Default root of the kernel power-supply class.
pub const DEFAULT_POWER_SUPPLY_PATH: &str = "/sys/class/power_supply";

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/battery-gauge.sock";

/// Daemon configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub warning_level: u8,
    pub critical_level: u8,
    pub rates: RateDefaults,
    /// Seconds between battery samples
    pub poll_interval_secs: u64,
    pub power_supply_path: PathBuf,
    pub socket_path: PathBuf,
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            warning_level: thresholds.warning_level,
            critical_level: thresholds.critical_level,
            rates: RateDefaults::default(),
            poll_interval_secs: 60,
            power_supply_path: PathBuf::from(DEFAULT_POWER_SUPPLY_PATH),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            enabled: true,
        }
    }
}

impl Config {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warning_level > 100 {
            return Err(ConfigError::ValidationError(format!(
                "warning_level ({}) must not exceed 100%",
                self.warning_level
            )));
        }

        if self.critical_level > self.warning_level {
            return Err(ConfigError::ValidationError(format!(
                "critical_level ({}) cannot be greater than warning_level ({})",
                self.critical_level, self.warning_level
            )));
        }

        let rates = [
            ("charging_secs", self.rates.charging_secs),
            ("usb_charging_secs", self.rates.usb_charging_secs),
            ("discharging_secs", self.rates.discharging_secs),
        ];
        for (name, value) in rates {
            if value <= 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rates.{} ({}) must be positive",
                    name, value
                )));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            warning_level: self.warning_level,
            critical_level: self.critical_level,
        }
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<Config>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file, then rename over the real one
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*config)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| Config::default())
    }

    /// Update configuration with validation, then persist it.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;

        let mut current = self.config.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;

        *current = config;

        // Release lock before saving
        drop(current);

        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (e.g. ~/.config/battery-gauge/config.json).
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("battery-gauge"))
        .unwrap_or_else(|| PathBuf::from("/tmp/battery-gauge"))
}
