use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL the activity endpoints hang off (e.g. "https://crm.example.com/api/")
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

/// Background refresh and staleness settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// How often the activity list is refetched in the background
  pub activities_interval_secs: u64,
  /// How often the metrics are refetched in the background
  pub metrics_interval_secs: u64,
  /// Entries older than this are refetched on the next read
  pub max_age_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      activities_interval_secs: 30,
      metrics_interval_secs: 60,
      max_age_secs: 300,
    }
  }
}

impl SyncConfig {
  pub fn activities_interval(&self) -> Duration {
    Duration::from_secs(self.activities_interval_secs.max(1))
  }

  pub fn metrics_interval(&self) -> Duration {
    Duration::from_secs(self.metrics_interval_secs.max(1))
  }

  /// Saturates at `chrono::Duration::MAX` for values chrono cannot represent.
  pub fn max_age(&self) -> chrono::Duration {
    i64::try_from(self.max_age_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .unwrap_or(chrono::Duration::MAX)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter used when RUST_LOG is not set
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Read the sync configuration.
  ///
  /// `--config` must point at an existing file. Without it the working
  /// directory's `activity-sync.yaml` is tried before the per-user file
  /// under the platform config dir.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => {
        return Err(eyre!("--config {} does not exist", p.display()));
      }
      Some(p) => p.to_path_buf(),
      None => Self::candidate_paths()
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| {
          eyre!("No activity-sync.yaml in the working directory or the user config dir")
        })?,
    };
    Self::read(&path)
  }

  fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("activity-sync.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("activity-sync").join("config.yaml")));
    paths
  }

  fn read(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Cannot read {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Invalid config in {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Bearer token for the activity store: ACTIVITY_SYNC_TOKEN, else
  /// CRM_API_TOKEN.
  pub fn get_api_token() -> Result<String> {
    std::env::var("ACTIVITY_SYNC_TOKEN")
      .or_else(|_| std::env::var("CRM_API_TOKEN"))
      .map_err(|_| eyre!("No API token: set ACTIVITY_SYNC_TOKEN or CRM_API_TOKEN"))
  }
}
