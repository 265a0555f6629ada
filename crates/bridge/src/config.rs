//! Bridge configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub bridge: BridgeSettings,
    pub device: DeviceSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub log_level: String,
}

/// Device selection and negotiation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// VID:PID patterns the picker may select (empty = any device)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Configuration index to select after opening
    #[serde(default = "DeviceSettings::default_configuration")]
    pub configuration: u8,
    /// Interface index to claim
    #[serde(default)]
    pub interface: u8,
    /// Bulk IN endpoint address
    #[serde(default = "DeviceSettings::default_endpoint_in")]
    pub endpoint_in: u8,
    /// Bulk OUT endpoint address
    #[serde(default = "DeviceSettings::default_endpoint_out")]
    pub endpoint_out: u8,
    /// Bulk transfer timeout in milliseconds
    #[serde(default = "DeviceSettings::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl DeviceSettings {
    fn default_configuration() -> u8 {
        1
    }

    fn default_endpoint_in() -> u8 {
        0x81
    }

    fn default_endpoint_out() -> u8 {
        0x02
    }

    fn default_timeout_ms() -> u64 {
        5000
    }

    /// Transfer timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            configuration: Self::default_configuration(),
            interface: 0,
            endpoint_in: Self::default_endpoint_in(),
            endpoint_out: Self::default_endpoint_out(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Upload chunking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Maximum chunk size in bytes
    #[serde(default = "TransferSettings::default_chunk_size")]
    pub chunk_size: usize,
    /// Read every written chunk back and verify its CRC32C
    #[serde(default)]
    pub verify_writes: bool,
}

impl TransferSettings {
    fn default_chunk_size() -> usize {
        64 * 1024
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            verify_writes: false,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeSettings {
                log_level: "info".to_string(),
            },
            device: DeviceSettings::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/sdbridge/sdbridge.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("sdbridge").join("sdbridge.toml")
        } else {
            PathBuf::from(".config/sdbridge/sdbridge.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.bridge.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.bridge.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.device.filters {
            Self::validate_filter(filter)?;
        }

        if self.transfer.chunk_size == 0 {
            return Err(anyhow!("chunk_size must be greater than 0"));
        }

        // An IN endpoint carries the direction bit, an OUT endpoint does not
        if self.device.endpoint_in & 0x80 == 0 {
            return Err(anyhow!(
                "endpoint_in {:#04x} is not an IN endpoint address",
                self.device.endpoint_in
            ));
        }
        if self.device.endpoint_out & 0x80 != 0 {
            return Err(anyhow!(
                "endpoint_out {:#04x} is not an OUT endpoint address",
                self.device.endpoint_out
            ));
        }

        Ok(())
    }

    /// Validate a device filter pattern (VID:PID, `0x` prefixes optional)
    fn validate_filter(filter: &str) -> Result<()> {
        let Some((vid, pid)) = filter.split_once(':') else {
            return Err(anyhow!(
                "Invalid filter '{}', expected VID:PID (e.g. '0781:5581' or '0x0781:*')",
                filter
            ));
        };

        for (part, name) in [(vid, "VID"), (pid, "PID")] {
            if part == "*" {
                continue;
            }
            let hex = part.trim_start_matches("0x").trim_start_matches("0X");
            if hex.is_empty() || hex.len() > 4 {
                return Err(anyhow!(
                    "Invalid {} '{}', hex part must be 1-4 digits",
                    name,
                    part
                ));
            }
            u16::from_str_radix(hex, 16)
                .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, part))?;
        }

        Ok(())
    }
}
