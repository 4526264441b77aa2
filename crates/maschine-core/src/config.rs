//! Driver configuration schema and loader
//!
//! Configuration is stored as YAML in the user config directory.
//! Default location: ~/.config/maschine-driver/driver.yaml
//!
//! Missing file or missing fields fall back to defaults; a malformed file
//! is logged and replaced by defaults rather than failing startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Pad velocity curve skew.
    ///
    /// 0 gives a linear curve; positive values bow the curve upward,
    /// negative values flatten the response toward the top of the range.
    pub velocity_curve_skew: f64,

    /// First note of the pad grid
    pub base_note: u8,

    /// Keybed illumination color index (Kontrol keyzone config)
    pub key_color: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            velocity_curve_skew: -0.85,
            base_note: 36,
            key_color: 0x0b,
        }
    }
}

/// Default config file location.
pub fn default_driver_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maschine-driver")
        .join("driver.yaml")
}

/// Load configuration from the given path, falling back to defaults.
pub fn load_driver_config(path: &Path) -> DriverConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str(&contents) {
            Ok(config) => {
                log::info!("[Config] Loaded driver config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "[Config] Failed to parse {}: {}, using defaults",
                    path.display(),
                    e
                );
                DriverConfig::default()
            }
        },
        Err(_) => {
            log::debug!("[Config] No config at {}, using defaults", path.display());
            DriverConfig::default()
        }
    }
}

/// Save driver configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_driver_config(config: &DriverConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize driver config")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("[Config] Saved driver config to {}", path.display());
    Ok(())
}
