//! Application configuration.
//!
//! Read from `config.yaml` in the data directory when present. Every field is
//! optional in the file. Environment variables override the file:
//!
//! | variable                  | field          |
//! |---------------------------|----------------|
//! | `CATTLE_TRACKER_DATA_DIR` | data directory |
//! | `CATTLE_TRACKER_API_BASE` | `api_base`     |
//! | `CATTLE_TRACKER_LOG`      | `log_level`    |
//!
//! The default data directory is `<platform data dir>/Cattle Tracker`,
//! falling back to `~/Documents/Cattle Tracker`.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use shared::DEFAULT_VWP_DAYS;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const DATA_DIR_ENV: &str = "CATTLE_TRACKER_DATA_DIR";
pub const API_BASE_ENV: &str = "CATTLE_TRACKER_API_BASE";
pub const LOG_ENV: &str = "CATTLE_TRACKER_LOG";

/// Remote request timeout when none is configured
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where storage files live; also redirects away from the default
    /// location when set in the default location's config file
    pub data_directory: Option<PathBuf>,
    /// Server URL; when set the session runs in remote mode
    pub api_base: Option<String>,
    pub request_timeout_secs: u64,
    /// VWP used by reports for animals without one
    pub default_vwp: u32,
    /// Name written to audit records
    pub user_name: String,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            api_base: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            default_vwp: DEFAULT_VWP_DAYS,
            user_name: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Platform default for the data directory
pub fn default_data_directory() -> Result<PathBuf> {
    if let Some(data_dir) = dirs::data_dir() {
        return Ok(data_dir.join("Cattle Tracker"));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join("Documents").join("Cattle Tracker"))
}

impl AppConfig {
    /// Load configuration using the process environment
    pub fn load(data_dir_override: Option<&Path>) -> Result<Self> {
        Self::load_with(data_dir_override, |name| std::env::var(name).ok())
    }

    /// Load configuration with an explicit environment lookup
    pub fn load_with<F>(data_dir_override: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_dir = match data_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => match env(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
                Some(dir) => PathBuf::from(dir.trim()),
                None => default_data_directory()?,
            },
        };

        let mut config = Self::read_file(&base_dir)?.unwrap_or_default();
        let data_dir = match &config.data_directory {
            Some(redirect) if data_dir_override.is_none() && redirect != &base_dir => {
                info!("Data directory redirected to {}", redirect.display());
                redirect.clone()
            }
            _ => base_dir,
        };
        config.data_directory = Some(data_dir);
        config.apply_env(env);
        Ok(config)
    }

    fn read_file(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        match serde_yaml::from_str::<AppConfig>(&content) {
            Ok(config) => Ok(Some(config)),
            Err(e) => {
                warn!("Ignoring invalid config file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = env(API_BASE_ENV) {
            self.api_base = Some(api_base.trim().to_string());
        }
        if let Some(level) = env(LOG_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
    }

    /// Write this configuration to `config.yaml` in the data directory
    pub fn save(&self) -> Result<()> {
        let dir = self.data_dir()?;
        fs::create_dir_all(&dir)?;
        let path = dir.join(CONFIG_FILE_NAME);
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, serde_yaml::to_string(self)?)?;
        fs::rename(&temp_path, &path)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_directory {
            Some(dir) => Ok(dir.clone()),
            None => default_data_directory(),
        }
    }

    /// Configured server URL, if any
    pub fn api_base(&self) -> Option<&str> {
        self.api_base.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = if self.request_timeout_secs == 0 {
            DEFAULT_REQUEST_TIMEOUT_SECS
        } else {
            self.request_timeout_secs
        };
        Duration::from_secs(secs)
    }

    /// Name for audit records, falling back to the OS user
    pub fn user_name(&self) -> String {
        if !self.user_name.trim().is_empty() {
            return self.user_name.trim().to_string();
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "local".to_string())
    }
}
