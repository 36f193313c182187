// src/config.rs

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AgentError, Result};

const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    // 🛡️ Identity & Trust Anchors
    pub task_id: String,
    pub app_name: Option<String>,
    pub vault_addr: String,
    pub broker_addr: String,

    // 📂 Inputs & Outputs
    pub secrets_path: PathBuf,
    pub credential_path: PathBuf,
    pub working_directory: Option<PathBuf>,
    pub entry_cmd: Vec<String>,

    // ⏱️ Renewal Cadence
    pub refresh_interval: Duration,
    /// Advisory only: surfaced in warnings, never shortens the renewal cadence.
    pub renewal_grace: Duration,
    pub request_timeout: Duration,

    pub log_format: LogFormat,
}

/// On-disk agent config (JSON).
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub entry_cmd: String,
    #[serde(alias = "output_path")]
    pub credential_path: PathBuf,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    pub refresh_interval: f64,
    pub renewal_grace: f64,
    #[serde(default)]
    pub request_timeout: Option<f64>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::config(format!("cannot read agent config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AgentError::config(format!("invalid agent config {}: {}", path.display(), e))
        })
    }
}

impl AgentConfig {
    /// Loads from the process environment and the config file it points at.
    pub fn load() -> Result<Self> {
        let lookup = |key: &str| env::var(key).ok();
        let path = required(&lookup, "VAULTKEEPER_CONFIG")?;
        let file = FileConfig::from_path(Path::new(&path))?;
        Self::from_parts(file, lookup)
    }

    /// Combines a parsed file with an environment lookup. Split out so tests never touch
    /// the real process environment.
    pub fn from_parts<F>(file: FileConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entry_cmd = shlex::split(&file.entry_cmd)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| AgentError::config("entry_cmd is empty or has unbalanced quoting"))?;

        let log_format = match lookup("VAULTKEEPER_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AgentError::config(format!("unknown log format '{}'", other)));
            }
        };

        Ok(Self {
            task_id: required(&lookup, "MESOS_TASK_ID")?,
            app_name: lookup("MARATHON_APP_ID").filter(|v| !v.is_empty()),
            vault_addr: required(&lookup, "VAULT_ADDR")?,
            broker_addr: required(&lookup, "GATEKEEPER_ADDR")?,
            secrets_path: PathBuf::from(required(&lookup, "SECRETS_CONFIG")?),
            credential_path: file.credential_path,
            working_directory: file.working_directory,
            entry_cmd,
            refresh_interval: seconds("refresh_interval", file.refresh_interval, false)?,
            renewal_grace: seconds("renewal_grace", file.renewal_grace, true)?,
            request_timeout: seconds(
                "request_timeout",
                file.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
                false,
            )?,
            log_format,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AgentError::config(format!("environment variable {} is not set", key)))
}

fn seconds(field: &str, value: f64, allow_zero: bool) -> Result<Duration> {
    let valid = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if !valid {
        return Err(AgentError::config(format!("{} must be a positive number of seconds", field)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|_| AgentError::config(format!("{} is too large: {} seconds", field, value)))
}
