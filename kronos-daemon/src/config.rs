//! Configuration management for the backup daemon.
//!
//! Loads configuration from a TOML file. Every `[[unit]]` table becomes one
//! scheduled backup job.

use crate::utils::errors::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub storage: RemoteStorages,

    #[serde(default, rename = "unit")]
    pub units: Vec<BackupUnit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log lines to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub token: String,

    /// Chat that receives notifications
    pub chat_id: String,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

/// Credentials and locations of every remote backend the units may target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteStorages {
    #[serde(default)]
    pub gdrive: Option<DriveConfig>,

    #[serde(default)]
    pub gcloud: Option<CloudConfig>,

    #[serde(default)]
    pub share: Option<ShareConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    /// OAuth client credentials JSON downloaded from the API console
    pub credentials_file: PathBuf,

    /// Where the OAuth token is persisted after authorization
    pub token_file: PathBuf,

    #[serde(default = "default_drive_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Service-account credentials JSON
    pub credentials_file: PathBuf,

    /// Bucket that receives the archives
    pub bucket: String,

    #[serde(default = "default_cloud_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Mount point of the network share
    pub path: PathBuf,
}

/// One named, independently scheduled backup job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupUnit {
    pub name: String,

    /// Source directories, archived in order
    #[serde(rename = "input")]
    pub input_paths: Vec<PathBuf>,

    /// Local archive root
    #[serde(rename = "output")]
    pub output_path: PathBuf,

    #[serde(default = "default_compress_format")]
    pub compress_format: String,

    /// Glob patterns matched against entry base names
    #[serde(default)]
    pub compress_exclude: Vec<String>,

    /// Cron expression (five-field crontab or six-field with seconds)
    #[serde(rename = "crontab")]
    pub crontab_task: String,

    /// Backend names: gdrive, gcloud, share
    #[serde(default)]
    pub upload_to: Vec<String>,

    /// Logical remote root under which `<name>/<YYYY-MM>` is created
    #[serde(default)]
    pub remote_path: String,

    /// Days to keep archives; parsed but not enforced
    #[serde(default)]
    pub retention: u32,
}

impl BackupUnit {
    /// Remote folder for an archive of this unit: `<remote_path>/<name>/<year_month>`.
    pub fn remote_dir(&self, year_month: &str) -> String {
        [self.remote_path.as_str(), self.name.as_str(), year_month]
            .iter()
            .flat_map(|part| part.split('/'))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_compress_format() -> String {
    "zip".to_string()
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_drive_api() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_cloud_api() -> String {
    "https://storage.googleapis.com".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unit tables the scheduler could not run unambiguously.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(KeeperError::Config("unit without a name".into()));
            }
            if !names.insert(unit.name.as_str()) {
                return Err(KeeperError::Config(format!(
                    "duplicate unit name '{}'",
                    unit.name
                )));
            }
            if unit.crontab_task.trim().is_empty() {
                return Err(KeeperError::Config(format!(
                    "unit '{}' has an empty crontab expression",
                    unit.name
                )));
            }
        }
        Ok(())
    }

    pub fn unit(&self, name: &str) -> Option<&BackupUnit> {
        self.units.iter().find(|unit| unit.name == name)
    }
}
