//! ---
//! cvl_section: "06-configuration"
//! cvl_subsection: "module"
//! cvl_type: "source"
//! cvl_scope: "code"
//! cvl_description: "Configuration loading for the daemon, agents, and DM."
//! cvl_version: "v0.1.0"
//! cvl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_agent_name() -> String {
    "agent".to_owned()
}

fn default_application_directory() -> PathBuf {
    PathBuf::from("applications")
}

fn default_work_directory() -> PathBuf {
    PathBuf::from("target/caravel-work")
}

fn default_target_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_transport() -> String {
    "in_memory".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the Caravel runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub dm: DmConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
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
    pub const ENV_CONFIG_PATH: &str = "CARAVEL_CONFIG";

    /// Load configuration from disk, respecting the `CARAVEL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
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

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.agent.name.trim().is_empty() {
            return Err(anyhow!("agent name cannot be empty"));
        }
        if self.dm.target_poll_interval.is_zero() {
            return Err(anyhow!("dm target poll interval must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            dm: DmConfig::default(),
            messaging: MessagingConfig::default(),
            logging: LoggingConfig::default(),
        }
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

/// Settings for one agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Stable identifier for the agent, also used as its messaging endpoint.
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Directory holding application model definitions and graph resources.
    #[serde(default = "default_application_directory")]
    pub application_directory: PathBuf,
    /// Directory where per-instance runtime resources are materialised.
    #[serde(default = "default_work_directory")]
    pub work_directory: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            application_directory: default_application_directory(),
            work_directory: default_work_directory(),
        }
    }
}

/// Settings for the deployment manager process.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DmConfig {
    /// Cadence of the target-handler polling scheduler.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_target_poll_interval")]
    pub target_poll_interval: Duration,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            target_poll_interval: default_target_poll_interval(),
        }
    }
}

/// Messaging backend selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagingConfig {
    /// Transport kind identifier (`in_memory` is the only built-in backend).
    #[serde(default = "default_transport")]
    pub transport: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
        }
    }
}

/// Logging destination and formatting settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}
