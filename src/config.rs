//! Configuration for the framebuffer library and the demo binary
//!
//! Loads configuration from TOML file at `~/.config/epdfb/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::epdc::{AutoUpdateMode, UpdateScheme};
use crate::framebuffer::{
    ControllerGeneration, DrawCorrection, FramebufferOptions, ModeSet, RegionCorrection,
    RetryPolicy, Temperature,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    /// Corrections applied to refresh regions
    pub region: RegionCorrection,
    /// Corrections applied when drawing
    pub drawing: DrawCorrection,
    pub refresh: RefreshConfig,
    pub trace: TraceConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config = Self::from_toml_str(&content)?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("epdfb");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    pub fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    /// Options for opening a framebuffer with this configuration.
    pub fn framebuffer_options(&self) -> FramebufferOptions {
        FramebufferOptions::from(self)
    }
}

impl From<&Config> for FramebufferOptions {
    fn from(config: &Config) -> Self {
        FramebufferOptions {
            generation: config.device.generation,
            region: config.region,
            draw: config.drawing,
            wait_timeout: config.refresh.wait_timeout(),
            update_scheme: config.device.update_scheme,
            auto_update_mode: config.device.auto_update_mode,
            mode_set: config.device.mode_set.clone(),
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Framebuffer device node
    pub path: PathBuf,
    /// Update layout understood by the driver: "v1" or "v2"
    pub generation: ControllerGeneration,
    /// "snapshot", "queue" or "queue_and_merge"; unset keeps the driver's choice
    pub update_scheme: Option<UpdateScheme>,
    /// "region" or "automatic"; unset keeps the driver's choice
    pub auto_update_mode: Option<AutoUpdateMode>,
    /// Display mode written once at open
    pub mode_set: Option<ModeSet>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/fb0"),
            generation: ControllerGeneration::V2,
            update_scheme: None,
            auto_update_mode: None,
            mode_set: None,
        }
    }
}

/// Refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Upper bound on a completion wait in milliseconds; 0 blocks indefinitely
    pub wait_timeout_ms: u64,
    /// Temperature used by the demo's refreshes
    pub temperature: Temperature,
    pub retry: RetryConfig,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5000,
            temperature: Temperature::Ambient,
            retry: RetryConfig::default(),
        }
    }
}

impl RefreshConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        match self.wait_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Resubmission of rejected updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total submissions, including the first
    pub max_attempts: u32,
    /// Pause between submissions in milliseconds
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// Call tracing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Log every controller call under the `epdfb::ioctl` target
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.device.path, PathBuf::from("/dev/fb0"));
        assert_eq!(config.device.generation, ControllerGeneration::V2);
        assert_eq!(config.region, RegionCorrection::default());
        assert_eq!(config.region.x_divisor, 2);
        assert_eq!(config.drawing.pixel_repeat, 1);
        assert_eq!(config.refresh.wait_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.refresh.retry.policy(), RetryPolicy::default());
        assert!(!config.trace.enabled);
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml_str(
            r#"
            [device]
            path = "/dev/fb1"
            generation = "v1"
            update_scheme = "queue_and_merge"
            auto_update_mode = "region"

            [device.mode_set]
            rotate = 1
            pixclock = 160000000

            [region]
            x_divisor = 1
            width_scale = 2
            min_dimension = 8

            [drawing]
            pixel_repeat = 2

            [refresh]
            wait_timeout_ms = 0
            temperature = { explicit = 24 }

            [refresh.retry]
            max_attempts = 3
            backoff_ms = 50

            [trace]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.device.path, PathBuf::from("/dev/fb1"));
        assert_eq!(config.device.generation, ControllerGeneration::V1);
        assert_eq!(config.device.update_scheme, Some(UpdateScheme::QueueAndMerge));
        assert_eq!(config.device.auto_update_mode, Some(AutoUpdateMode::Region));
        let mode_set = config.device.mode_set.as_ref().unwrap();
        assert_eq!(mode_set.rotate, Some(1));
        assert_eq!(mode_set.xres, None);
        assert_eq!(config.region.width_scale, 2);
        assert_eq!(config.region.min_dimension, 8);
        assert_eq!(config.drawing.pixel_repeat, 2);
        assert_eq!(config.drawing.width_scale, 1);
        assert_eq!(config.refresh.wait_timeout(), None);
        assert_eq!(config.refresh.temperature, Temperature::Explicit(24));
        assert_eq!(config.refresh.retry.policy().backoff, Duration::from_millis(50));
        assert!(config.trace.enabled);

        let options = config.framebuffer_options();
        assert_eq!(options.generation, ControllerGeneration::V1);
        assert_eq!(options.region.x_divisor, 1);
        assert_eq!(options.wait_timeout, None);
        assert!(options.mode_set.is_some());
    }

    #[test]
    fn test_invalid_generation_is_rejected() {
        let err = Config::from_toml_str("[device]\ngeneration = \"v3\"\n").unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_default_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::save_default(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded.device.path, PathBuf::from("/dev/fb0"));
        assert_eq!(loaded.refresh.wait_timeout_ms, 5000);
        assert_eq!(loaded.refresh.temperature, Temperature::Ambient);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("absent.toml")).is_err());
    }
}
