// src/workflow/command.rs

//! Workflow backed by an external command.
//!
//! The command is run through the platform shell once per event, with the
//! event id available both as `$1` and as `TRACEWATCH_EVENT_ID`. Its last
//! non-empty stdout line may be a JSON [`WorkflowReport`]; if it is not, the
//! exit status decides success. A `result` in the report is written back to
//! the store when one is configured.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{Result, TracewatchError};
use crate::store::EventStore;
use crate::types::{BoxFuture, EventId};
use crate::workflow::{Workflow, WorkflowReport};

pub const EVENT_ID_ENV: &str = "TRACEWATCH_EVENT_ID";

pub struct CommandWorkflow {
    cmd: String,
    store: Option<Arc<dyn EventStore>>,
}

impl std::fmt::Debug for CommandWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandWorkflow")
            .field("cmd", &self.cmd)
            .field("writes_back", &self.store.is_some())
            .finish()
    }
}

impl CommandWorkflow {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            store: None,
        }
    }

    /// Write report results back to `store`.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn run(&self, id: &EventId) -> Result<WorkflowReport> {
        info!(event_id = %id, cmd = %self.cmd, "starting workflow command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd).arg(id.as_str());
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd).arg("tracewatch").arg(id.as_str());
            c
        };

        // kill_on_drop: a dispatch cancelled at shutdown drops this future,
        // which must take the child process with it.
        cmd.env(EVENT_ID_ENV, id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TracewatchError::WorkflowError(format!(
                "spawning workflow command for event '{id}': {e}"
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            let event_id = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(event_id = %event_id, "stderr: {}", line);
                }
            });
        }

        let mut last_line: Option<String> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(|e| {
                TracewatchError::WorkflowError(format!(
                    "reading workflow output for event '{id}': {e}"
                ))
            })? {
                debug!(event_id = %id, "stdout: {}", line);
                if !line.trim().is_empty() {
                    last_line = Some(line);
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            TracewatchError::WorkflowError(format!(
                "waiting for workflow command of event '{id}': {e}"
            ))
        })?;

        let report = report_from_output(last_line.as_deref(), status.success(), status.code());

        info!(
            event_id = %id,
            exit_code = status.code().unwrap_or(-1),
            status = %report.status,
            "workflow command exited"
        );

        Ok(report)
    }

    async fn write_back(&self, id: &EventId, report: &WorkflowReport) {
        let (Some(store), Some(result)) = (&self.store, &report.result) else {
            return;
        };

        match store.set_result(id, result.clone()).await {
            Ok(true) => debug!(event_id = %id, "workflow result stored"),
            Ok(false) => warn!(event_id = %id, "event vanished before result could be stored"),
            Err(e) => warn!(event_id = %id, error = %e, "failed to store workflow result"),
        }
    }
}

/// Build a report from the command's final stdout line and exit status.
///
/// A JSON report wins, except that a non-zero exit can never count as
/// success.
fn report_from_output(last_line: Option<&str>, exited_ok: bool, code: Option<i32>) -> WorkflowReport {
    let parsed = last_line.and_then(|l| serde_json::from_str::<WorkflowReport>(l.trim()).ok());

    match (parsed, exited_ok) {
        (Some(report), true) => report,
        (Some(mut report), false) => {
            if report.is_success() {
                report.status = "error".to_string();
            }
            report
        }
        (None, true) => WorkflowReport::success(last_line.unwrap_or_default().to_string()),
        (None, false) => WorkflowReport::error(format!(
            "workflow command exited with code {}",
            code.unwrap_or(-1)
        )),
    }
}

impl Workflow for CommandWorkflow {
    fn invoke<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<WorkflowReport>> {
        Box::pin(async move {
            let report = self.run(id).await?;
            if report.is_success() {
                self.write_back(id, &report).await;
            }
            Ok(report)
        })
    }
}
