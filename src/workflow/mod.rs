// src/workflow/mod.rs

//! Workflow collaborator.
//!
//! A workflow computes a result for one event and writes it back to the
//! store. The detection core only sees the returned [`WorkflowReport`]; a
//! report whose `status` equals [`SUCCESS_STATUS`] marks the event as
//! successfully processed.
//!
//! [`command::CommandWorkflow`] runs an external program per event.

pub mod command;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::types::{BoxFuture, EventId};

pub use command::CommandWorkflow;

/// Status value that marks a successful run.
pub const SUCCESS_STATUS: &str = "success";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// Result document to store on the event, if the workflow produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl WorkflowReport {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: SUCCESS_STATUS.to_string(),
            message: message.into(),
            result: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// Runs the per-event workflow.
///
/// Implementations may take arbitrarily long and may fail; the dispatcher
/// isolates each invocation in its own task.
pub trait Workflow: Send + Sync {
    fn invoke<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<WorkflowReport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_sentinel_counts_as_success() {
        assert!(WorkflowReport::success("done").is_success());
        assert!(!WorkflowReport::error("boom").is_success());

        let partial: WorkflowReport =
            serde_json::from_str(r#"{"status": "Success"}"#).unwrap();
        assert!(!partial.is_success());
        assert_eq!(partial.message, "");
    }
}
