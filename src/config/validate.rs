// src/config/validate.rs

use std::path::PathBuf;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, DEFAULT_STORE_PATH, RawConfigFile};
use crate::errors::{Result, TracewatchError};
use crate::source::{PollingOptions, StreamingOptions};
use crate::tracker::TrackerOptions;
use crate::types::DetectionMode;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = TracewatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let defaults = ConfigFile::default();

        let mode = match raw.detector.mode.as_deref() {
            Some(s) => s
                .parse::<DetectionMode>()
                .map_err(|e| TracewatchError::ConfigError(format!("[detector].mode: {e}")))?,
            None => defaults.mode,
        };

        let polling = PollingOptions {
            poll_interval: interval(
                "[detector].poll_interval",
                raw.detector.poll_interval.as_deref(),
                defaults.polling.poll_interval,
            )?,
            error_backoff: interval(
                "[detector].error_backoff",
                raw.detector.error_backoff.as_deref(),
                defaults.polling.error_backoff,
            )?,
        };

        let streaming = StreamingOptions {
            reconnect_backoff: interval(
                "[detector].reconnect_backoff",
                raw.detector.reconnect_backoff.as_deref(),
                defaults.streaming.reconnect_backoff,
            )?,
            close_timeout: interval(
                "[detector].close_timeout",
                raw.detector.close_timeout.as_deref(),
                defaults.streaming.close_timeout,
            )?,
        };

        let capacity = raw.tracker.capacity.unwrap_or(defaults.tracker.capacity);
        if capacity == 0 {
            return Err(TracewatchError::ConfigError(
                "[tracker].capacity must be >= 1 (got 0)".to_string(),
            ));
        }
        let tracker = TrackerOptions {
            retention: interval(
                "[tracker].retention",
                raw.tracker.retention.as_deref(),
                defaults.tracker.retention,
            )?,
            capacity,
        };

        let shutdown_timeout = interval(
            "[supervisor].shutdown_timeout",
            raw.supervisor.shutdown_timeout.as_deref(),
            defaults.shutdown_timeout,
        )?;

        let store_path = raw
            .store
            .path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
        if store_path.as_os_str().is_empty() {
            return Err(TracewatchError::ConfigError(
                "[store].path must not be empty".to_string(),
            ));
        }

        let workflow_cmd = match raw.workflow.cmd {
            Some(cmd) if cmd.trim().is_empty() => {
                return Err(TracewatchError::ConfigError(
                    "[workflow].cmd must not be empty".to_string(),
                ));
            }
            other => other,
        };

        Ok(ConfigFile {
            mode,
            polling,
            streaming,
            tracker,
            shutdown_timeout,
            store_path,
            workflow_cmd,
        })
    }
}

/// Parse an optional duration key, falling back to `default`. Zero is
/// rejected: every configured interval paces a loop or bounds a wait.
fn interval(key: &str, value: Option<&str>, default: Duration) -> Result<Duration> {
    let Some(value) = value else {
        return Ok(default);
    };
    let duration =
        parse_duration(value).map_err(|e| TracewatchError::ConfigError(format!("{key}: {e}")))?;
    if duration.is_zero() {
        return Err(TracewatchError::ConfigError(format!(
            "{key} must be greater than zero (got '{value}')"
        )));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg, ConfigFile::default());
        assert_eq!(cfg.polling.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.tracker.capacity, 1000);
    }

    #[test]
    fn full_file_is_applied() {
        let cfg = parse(
            r#"
            [detector]
            mode = "both"
            poll_interval = "5s"
            error_backoff = "2s"
            reconnect_backoff = "1m"
            close_timeout = "500ms"

            [tracker]
            retention = "1h"
            capacity = 10

            [supervisor]
            shutdown_timeout = "3s"

            [store]
            path = "data/events.json"

            [workflow]
            cmd = "./assess.sh"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.mode, DetectionMode::Both);
        assert_eq!(cfg.polling.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.polling.error_backoff, Duration::from_secs(2));
        assert_eq!(cfg.streaming.reconnect_backoff, Duration::from_secs(60));
        assert_eq!(cfg.streaming.close_timeout, Duration::from_millis(500));
        assert_eq!(cfg.tracker.retention, Duration::from_secs(3600));
        assert_eq!(cfg.tracker.capacity, 10);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(cfg.store_path, PathBuf::from("data/events.json"));
        assert_eq!(cfg.workflow_cmd.as_deref(), Some("./assess.sh"));
    }

    #[test]
    fn rejects_zero_interval_and_capacity() {
        let err = parse("[detector]\npoll_interval = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval"), "{err}");

        let err = parse("[tracker]\ncapacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("capacity"), "{err}");
    }

    #[test]
    fn rejects_bad_mode_and_blank_command() {
        assert!(parse("[detector]\nmode = \"push\"\n").is_err());
        assert!(parse("[workflow]\ncmd = \"   \"\n").is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse("[detector]\npoll_intervall = \"5s\"\n").is_err());
        assert!(parse("[nonsense]\n").is_err());
    }
}
