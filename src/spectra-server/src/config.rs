//! Configuration loading: TOML search across CWD → XDG config dir →
//! `/etc`, with `#[serde(default)]` structs so every field has a sane
//! fallback.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spectra_core::{DetectorConfig, DeviceParams, DspConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub debug: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8765,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    pub usable_fraction: f64,
    pub settling_skip_blocks: u32,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            usable_fraction: 0.8,
            settling_skip_blocks: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    pub directory: PathBuf,
    pub storage_budget_bytes: u64,
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("recordings"),
            storage_budget_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub device: DeviceParams,
    pub dsp: DspConfig,
    pub sweep: SweepSection,
    pub detector: DetectorConfig,
    pub recorder: RecorderSection,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.dsp
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !(self.sweep.usable_fraction > 0.0 && self.sweep.usable_fraction <= 1.0) {
            return Err(ConfigError::Invalid(
                "sweep.usable_fraction must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Filename → content → `T`, as `ConfigFile::load_from_file` does, minus
/// the combined-file section support (spectra has no sibling binaries
/// sharing one config file, so that indirection is dropped).
pub fn load_from_file(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
}

#[must_use]
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("spectra.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("spectra").join("spectra.toml"));
    }
    paths.push(PathBuf::from("/etc/spectra/spectra.toml"));
    paths
}

pub fn load_from_default_paths() -> Result<(ServerConfig, Option<PathBuf>), ConfigError> {
    for path in default_search_paths() {
        if path.exists() {
            let cfg = load_from_file(&path)?;
            return Ok((cfg, Some(path)));
        }
    }
    Ok((ServerConfig::default(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_usable_fraction() {
        let mut cfg = ServerConfig::default();
        cfg.sweep.usable_fraction = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.toml");
        std::fs::write(&path, "[server]\nport = 9001\n").unwrap();
        let cfg = load_from_file(&path).unwrap();
        assert_eq!(cfg.server.port, 9001);
        assert_eq!(cfg.sweep.usable_fraction, 0.8);
    }
}
