//! Configuration file support for picboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PICBOOT_*)
//! 3. Local config file (./picboot.toml)
//! 4. Global config file (~/.config/picboot/config.toml)

use {
    directories::ProjectDirs,
    log::{debug, warn},
    picboot::TargetConfig,
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "picboot.toml";

/// Serial port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Host baud rate.
    pub baud: Option<u32>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Deadline for a bootloader reply, in milliseconds.
    pub response_timeout_ms: Option<u64>,
    /// Deadline for the erase reply, in milliseconds.
    pub erase_timeout_ms: Option<u64>,
    /// Start the monitor after every successful upload.
    pub monitor_after_upload: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the implicit locations, a file named explicitly must exist and
    /// parse.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read config file {}: {e}", path.display()))?;
        let config = Self::parse(&content)
            .map_err(|e| format!("Invalid TOML in config file {}: {e}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {e}", path.display());
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {e}", path.display());
                None
            },
        }
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "picboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }
        if other.port.baud.is_some() {
            self.port.baud = other.port.baud;
        }

        if other.upload.response_timeout_ms.is_some() {
            self.upload.response_timeout_ms = other.upload.response_timeout_ms;
        }
        if other.upload.erase_timeout_ms.is_some() {
            self.upload.erase_timeout_ms = other.upload.erase_timeout_ms;
        }
        if other.upload.monitor_after_upload.is_some() {
            self.upload.monitor_after_upload = other.upload.monitor_after_upload;
        }
    }

    /// Build the target parameters for a run.
    ///
    /// Explicit values win over the file; the file wins over the defaults.
    pub fn target_config(
        &self,
        baud: u32,
        response_timeout_ms: Option<u64>,
        erase_timeout_ms: Option<u64>,
    ) -> TargetConfig {
        let mut target = TargetConfig::default().with_baud(baud);
        if let Some(ms) = response_timeout_ms.or(self.upload.response_timeout_ms) {
            target = target.with_response_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = erase_timeout_ms.or(self.upload.erase_timeout_ms) {
            target = target.with_erase_timeout(Duration::from_millis(ms));
        }
        target
    }
}
