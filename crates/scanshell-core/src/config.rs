//! Configuration management
//!
//! Layering: defaults, then the TOML file, then environment overrides.
//! The result is validated before use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::store::{FileLicenseStore, InMemoryLicenseStore, LicenseStore};
use crate::types::ScannerMode;

pub const ENV_LICENSE_KEY: &str = "SCANSHELL_LICENSE_KEY";
pub const ENV_STORE_PATH: &str = "SCANSHELL_STORE_PATH";
pub const ENV_LOG: &str = "SCANSHELL_LOG";
pub const ENV_CONFIG: &str = "SCANSHELL_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseSection {
    pub android_key: String,
    pub ios_key: String,
    /// Used on other platforms; falls back to `android_key` when empty
    pub default_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Preference file; `None` keeps license state in memory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSection {
    pub mode: ScannerMode,
    pub crop_ratio: f32,
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            mode: ScannerMode::Any,
            crop_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Scanner shell configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub license: LicenseSection,
    pub storage: StorageSection,
    pub scanner: ScannerSection,
    pub logging: LoggingSection,
}

impl ScanConfig {
    /// Load from `path` (or `SCANSHELL_CONFIG`), apply environment overrides,
    /// and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(ENV_CONFIG).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SCANSHELL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_LICENSE_KEY).filter(|k| !k.is_empty()) {
            self.license.android_key = key.clone();
            self.license.ios_key = key.clone();
            self.license.default_key = key;
        }
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.storage.path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG).filter(|l| !l.is_empty()) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scanner.crop_ratio > 0.0 && self.scanner.crop_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "crop_ratio must be in (0, 1], got {}",
                self.scanner.crop_ratio
            )));
        }
        if self.license.android_key.is_empty()
            && self.license.ios_key.is_empty()
            && self.license.default_key.is_empty()
        {
            return Err(ConfigError::Invalid(format!(
                "no license key configured; set [license] or {ENV_LICENSE_KEY}"
            )));
        }
        Ok(())
    }

    /// License identifier for `platform`.
    pub fn license_key_for(&self, platform: Platform) -> Result<String, ConfigError> {
        let key = match platform {
            Platform::Android => &self.license.android_key,
            Platform::Ios => &self.license.ios_key,
            Platform::Other if self.license.default_key.is_empty() => &self.license.android_key,
            Platform::Other => &self.license.default_key,
        };
        if key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "no license key configured for {platform}"
            )));
        }
        Ok(key.clone())
    }

    /// Open the configured license store.
    pub fn open_store(&self) -> Arc<dyn LicenseStore> {
        match &self.storage.path {
            Some(path) => Arc::new(FileLicenseStore::new(path)),
            None => Arc::new(InMemoryLicenseStore::new()),
        }
    }
}
