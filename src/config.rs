//! Deployment-time configuration for both daemons, loaded from TOML.
//!
//! Grounded on `certmanager.rs`'s file-path configuration surface, widened
//! to a full `serde`-derived struct per the external interface the process
//! must honour.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_connection_cap() -> usize {
    0
}

fn default_validity_days() -> i64 {
    365
}

#[derive(Debug, Deserialize)]
pub struct CapfConfig {
    pub port: u16,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub issuer_cert: PathBuf,
    pub issuer_key: PathBuf,
    #[serde(default)]
    pub verify_anchors: Vec<PathBuf>,
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
    #[serde(default = "default_connection_cap")]
    pub connection_cap: usize,
    pub store_path: PathBuf,
    pub certificates_dir: Option<PathBuf>,
}

impl CapfConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3560).contains(&self.validity_days) {
            return Err(ConfigError::Invalid {
                option: "validity_days",
                reason: format!("{} is outside 1..=3560", self.validity_days),
            });
        }
        Ok(())
    }

    /// Defaults to the directory containing the store when unset.
    pub fn certificates_dir(&self) -> PathBuf {
        self.certificates_dir.clone().unwrap_or_else(|| {
            self.store_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TvsConfig {
    pub port: u16,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    #[serde(default = "default_connection_cap")]
    pub connection_cap: usize,
    pub store_path: PathBuf,
}

impl TvsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Self = toml::from_str(&text)?;
        Ok(cfg)
    }
}
