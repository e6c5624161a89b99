// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Result, TracewatchError};
use crate::source::{PollingOptions, StreamingOptions};
use crate::tracker::TrackerOptions;
use crate::types::DetectionMode;

pub const DEFAULT_STORE_PATH: &str = "local_storage/trace_events.json";

/// Configuration exactly as read from TOML, before validation.
///
/// ```toml
/// [detector]
/// mode = "polling"
/// poll_interval = "30s"
///
/// [tracker]
/// capacity = 1000
///
/// [workflow]
/// cmd = "./assess.sh"
/// ```
///
/// Every section and key is optional. Durations stay strings here; they are
/// parsed when converting into [`ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub detector: RawDetectorSection,
    #[serde(default)]
    pub tracker: RawTrackerSection,
    #[serde(default)]
    pub supervisor: RawSupervisorSection,
    #[serde(default)]
    pub store: RawStoreSection,
    #[serde(default)]
    pub workflow: RawWorkflowSection,
}

/// `[detector]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDetectorSection {
    /// `"polling"`, `"streaming"` or `"both"`.
    pub mode: Option<String>,
    pub poll_interval: Option<String>,
    pub error_backoff: Option<String>,
    pub reconnect_backoff: Option<String>,
    pub close_timeout: Option<String>,
}

/// `[tracker]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTrackerSection {
    pub retention: Option<String>,
    pub capacity: Option<usize>,
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSupervisorSection {
    pub shutdown_timeout: Option<String>,
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStoreSection {
    /// JSON file holding the trace events.
    pub path: Option<PathBuf>,
}

/// `[workflow]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWorkflowSection {
    /// Shell command run once per claimed event.
    pub cmd: Option<String>,
}

/// Environment variables that override the file, keyed by name.
pub const ENV_MODE: &str = "TRACEWATCH_MODE";
pub const ENV_POLL_INTERVAL: &str = "TRACEWATCH_POLL_INTERVAL";
pub const ENV_ERROR_BACKOFF: &str = "TRACEWATCH_ERROR_BACKOFF";
pub const ENV_RECONNECT_BACKOFF: &str = "TRACEWATCH_RECONNECT_BACKOFF";
pub const ENV_CLOSE_TIMEOUT: &str = "TRACEWATCH_CLOSE_TIMEOUT";
pub const ENV_RETENTION: &str = "TRACEWATCH_RETENTION";
pub const ENV_CAPACITY: &str = "TRACEWATCH_CAPACITY";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "TRACEWATCH_SHUTDOWN_TIMEOUT";
pub const ENV_STORE_PATH: &str = "TRACEWATCH_STORE_PATH";
pub const ENV_WORKFLOW_CMD: &str = "TRACEWATCH_WORKFLOW_CMD";

impl RawConfigFile {
    /// Apply `TRACEWATCH_*` overrides from `vars`. Unrelated keys are ignored.
    ///
    /// Takes the variables as an iterator (usually `std::env::vars()`) so
    /// callers and tests never have to mutate the process environment.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let value = value.into();
            match key.as_ref() {
                ENV_MODE => self.detector.mode = Some(value),
                ENV_POLL_INTERVAL => self.detector.poll_interval = Some(value),
                ENV_ERROR_BACKOFF => self.detector.error_backoff = Some(value),
                ENV_RECONNECT_BACKOFF => self.detector.reconnect_backoff = Some(value),
                ENV_CLOSE_TIMEOUT => self.detector.close_timeout = Some(value),
                ENV_RETENTION => self.tracker.retention = Some(value),
                ENV_CAPACITY => {
                    let capacity = value.trim().parse::<usize>().map_err(|e| {
                        TracewatchError::ConfigError(format!(
                            "{ENV_CAPACITY} must be a non-negative integer (got '{value}'): {e}"
                        ))
                    })?;
                    self.tracker.capacity = Some(capacity);
                }
                ENV_SHUTDOWN_TIMEOUT => self.supervisor.shutdown_timeout = Some(value),
                ENV_STORE_PATH => self.store.path = Some(PathBuf::from(value)),
                ENV_WORKFLOW_CMD => self.workflow.cmd = Some(value),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Validated configuration.
///
/// Constructed via `TryFrom<RawConfigFile>` (see `validate.rs`); holding one
/// means every duration parsed and every bound holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub mode: DetectionMode,
    pub polling: PollingOptions,
    pub streaming: StreamingOptions,
    pub tracker: TrackerOptions,
    pub shutdown_timeout: Duration,
    pub store_path: PathBuf,
    /// `None` when no workflow is configured; `run` and `trigger` need one.
    pub workflow_cmd: Option<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            mode: DetectionMode::default(),
            polling: PollingOptions::default(),
            streaming: StreamingOptions::default(),
            tracker: TrackerOptions::default(),
            shutdown_timeout: crate::supervisor::DEFAULT_SHUTDOWN_TIMEOUT,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            workflow_cmd: None,
        }
    }
}

impl ConfigFile {
    /// The workflow command, or a config error naming the missing key.
    pub fn require_workflow_cmd(&self) -> Result<&str> {
        self.workflow_cmd.as_deref().ok_or_else(|| {
            TracewatchError::ConfigError(format!(
                "no workflow command configured; set [workflow].cmd or {ENV_WORKFLOW_CMD}"
            ))
        })
    }
}
