//! Agent configuration
//!
//! All settings come from environment variables, read once at start-up.

use std::env;
use std::time::Duration;

use crate::error::ControllerError;
use crate::selector::LabelSelector;

const CONFIG_WORKSPACE: &str = "INIT_AGENT_CONFIG_WORKSPACE";
const TARGET_SELECTOR: &str = "INIT_AGENT_TARGET_SELECTOR";
const WORKERS: &str = "INIT_AGENT_WORKERS";
const RETRY_DELAY: &str = "INIT_AGENT_RETRY_DELAY_SECS";
const TARGET_RESYNC: &str = "INIT_AGENT_TARGET_RESYNC_SECS";
const ERROR_BACKOFF_MIN: &str = "INIT_AGENT_ERROR_BACKOFF_MIN_SECS";
const ERROR_BACKOFF_MAX: &str = "INIT_AGENT_ERROR_BACKOFF_MAX_SECS";
const LOG_FORMAT: &str = "INIT_AGENT_LOG_FORMAT";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Runtime configuration of the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace (path or logical cluster name) holding InitTargets and InitTemplates
    pub config_workspace: String,
    /// Restricts which InitTargets are handled
    pub target_selector: LabelSelector,
    /// Concurrent reconciles per InitTarget
    pub workers: usize,
    /// Delay before retrying a workspace whose manifests are not accepted yet
    pub retry_delay: Duration,
    /// How often active InitTargets are re-ensured
    pub target_resync: Duration,
    /// Lower bound of the error backoff, in seconds
    pub error_backoff_min_secs: u64,
    /// Upper bound of the error backoff, in seconds
    pub error_backoff_max_secs: u64,
    /// Log output format
    pub log_format: LogFormat,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config_workspace = lookup(CONFIG_WORKSPACE)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{CONFIG_WORKSPACE} environment variable is required"))
            })?;

        let target_selector = lookup(TARGET_SELECTOR)
            .unwrap_or_default()
            .parse::<LabelSelector>()
            .map_err(|e| ControllerError::InvalidConfig(format!("{TARGET_SELECTOR}: {e}")))?;

        let log_format = match lookup(LOG_FORMAT).as_deref().map(str::trim) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "{LOG_FORMAT} must be \"text\" or \"json\", got {other:?}"
                )));
            }
        };

        let config = Self {
            config_workspace,
            target_selector,
            workers: number(&lookup, WORKERS, 4)?,
            retry_delay: Duration::from_secs(number(&lookup, RETRY_DELAY, 5)?),
            target_resync: Duration::from_secs(number(&lookup, TARGET_RESYNC, 300)?),
            error_backoff_min_secs: number(&lookup, ERROR_BACKOFF_MIN, 5)?,
            error_backoff_max_secs: number(&lookup, ERROR_BACKOFF_MAX, 300)?,
            log_format,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(format!("{WORKERS} must be at least 1")));
        }
        if self.retry_delay.is_zero() {
            return Err(ControllerError::InvalidConfig(format!("{RETRY_DELAY} must be at least 1")));
        }
        if self.target_resync.is_zero() {
            return Err(ControllerError::InvalidConfig(format!("{TARGET_RESYNC} must be at least 1")));
        }
        if self.error_backoff_min_secs == 0 || self.error_backoff_min_secs > self.error_backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "{ERROR_BACKOFF_MIN} must be at least 1 and not above {ERROR_BACKOFF_MAX}"
            )));
        }
        Ok(())
    }
}

fn number<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}
