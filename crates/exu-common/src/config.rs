//! ---
//! exu_section: "01-core-functionality"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Shared primitives and utilities for the update engine."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_update_interval() -> Duration {
    Duration::from_secs(432_000)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_self_id() -> String {
    "updater@patapon.info".to_owned()
}

fn default_base_url() -> String {
    "https://extensions.gnome.org".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_version_targeting() -> bool {
    true
}

fn default_api_version() -> u32 {
    1
}

fn default_host_version() -> String {
    "3.4.0".to_owned()
}

fn default_extensions_dir() -> PathBuf {
    PathBuf::from("target/extensions")
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("target/state/settings.json")
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9464))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the updater runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "EXU_CONFIG";

    /// Load configuration from disk, respecting the `EXU_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.update.validate()?;
        self.repository.validate()?;
        if self.host.version.trim().is_empty() {
            return Err(anyhow!("host.version must not be empty"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Scheduling and trigger policy for update checks.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_update_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_retry_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_delay: Duration,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default = "default_self_id")]
    pub self_id: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval: default_update_interval(),
            retry_delay: default_retry_delay(),
            auto_update: false,
            self_id: default_self_id(),
        }
    }
}

impl UpdateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("update.interval must be greater than zero"));
        }
        if self.retry_delay.is_zero() {
            return Err(anyhow!("update.retry_delay must be greater than zero"));
        }
        if self.retry_delay > self.interval {
            return Err(anyhow!(
                "update.retry_delay ({}s) exceeds update.interval ({}s)",
                self.retry_delay.as_secs(),
                self.interval.as_secs()
            ));
        }
        Ok(())
    }
}

/// Shape of the `installed` map sent with a bulk update query.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstalledPayload {
    /// `id -> version`
    #[default]
    Versions,
    /// `id -> full component record`
    Records,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    #[serde(default)]
    pub installed_payload: InstalledPayload,
    #[serde(default = "default_version_targeting")]
    pub version_targeting: bool,
    #[serde(default = "default_api_version")]
    pub api_version: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_request_timeout(),
            installed_payload: InstalledPayload::default(),
            version_targeting: default_version_targeting(),
            api_version: default_api_version(),
        }
    }
}

impl RepositoryConfig {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.base_url)
            .with_context(|| format!("repository.base_url {} is not a valid URL", self.base_url))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_version")]
    pub version: String,
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: PathBuf,
    #[serde(default)]
    pub system_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_host_version(),
            extensions_dir: default_extensions_dir(),
            system_dirs: Vec::new(),
            disabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_settings_path")]
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

/// Prometheus scrape endpoint served by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
