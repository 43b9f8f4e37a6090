//! Configuration file support for slappy.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments and environment variables (SLAPPY_*)
//! 2. An explicit `--config PATH`
//! 3. Local config file (./slappy.toml)
//! 4. Global config file (e.g. ~/.config/slappy/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use slappybell::DeviceConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "slappy.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
}

/// Command timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Reply timeout for ordinary commands, in milliseconds.
    pub command_timeout_ms: Option<u64>,
    /// Reply timeout for `list`, in milliseconds.
    pub list_timeout_ms: Option<u64>,
}

/// Upload pacing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadSection {
    /// Pause between 256-byte chunks, in milliseconds.
    pub chunk_delay_ms: Option<u64>,
    /// Reply timeout once the payload is written, in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Command timing.
    #[serde(default)]
    pub device: DeviceSection,
    /// Upload pacing.
    #[serde(default)]
    pub upload: UploadSection,
}

impl Config {
    /// Load configuration from the global and local files, then `explicit`.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(path) = explicit {
            match Self::load_from_file(path) {
                Some(explicit_config) => {
                    debug!("Loaded config from {}", path.display());
                    config.merge(explicit_config);
                },
                None => warn!(
                    "Could not load config from {}, using defaults",
                    path.display()
                ),
            }
        }

        config
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "slappy").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.device.command_timeout_ms.is_some() {
            self.device.command_timeout_ms = other.device.command_timeout_ms;
        }
        if other.device.list_timeout_ms.is_some() {
            self.device.list_timeout_ms = other.device.list_timeout_ms;
        }
        if other.upload.chunk_delay_ms.is_some() {
            self.upload.chunk_delay_ms = other.upload.chunk_delay_ms;
        }
        if other.upload.timeout_ms.is_some() {
            self.upload.timeout_ms = other.upload.timeout_ms;
        }
    }

    /// Session timing with configured overrides applied.
    pub fn device_config(&self) -> DeviceConfig {
        let mut config = DeviceConfig::default();
        if let Some(ms) = self.device.command_timeout_ms {
            config = config.with_command_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.device.list_timeout_ms {
            config = config.with_list_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.upload.chunk_delay_ms {
            config = config.with_upload_chunk_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.upload.timeout_ms {
            config = config.with_upload_timeout(Duration::from_millis(ms));
        }
        config
    }
}
