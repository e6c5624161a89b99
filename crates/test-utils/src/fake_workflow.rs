use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tracewatch::errors::{Result, TracewatchError};
use tracewatch::types::{BoxFuture, EventId};
use tracewatch::workflow::{Workflow, WorkflowReport};

/// How a `FakeWorkflow` answers an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Report status `"success"`.
    Succeed,
    /// Report a non-success status.
    Fail,
    /// Return `Err`.
    Error,
    /// Never complete.
    Hang,
    /// Panic inside the invocation.
    Panic,
    /// Wait until `FakeWorkflow::release` is called, then succeed.
    Gated,
    /// Sleep, then succeed.
    Delay(Duration),
}

/// A fake workflow that:
/// - records every id it was invoked with
/// - answers according to a default `Behaviour`, overridable per id.
pub struct FakeWorkflow {
    default: Behaviour,
    per_id: Mutex<HashMap<EventId, Behaviour>>,
    calls: Mutex<Vec<EventId>>,
    gate: watch::Sender<bool>,
}

impl FakeWorkflow {
    pub fn new(default: Behaviour) -> Self {
        let (gate, _rx) = watch::channel(false);
        Self {
            default,
            per_id: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behaviour::Succeed)
    }

    /// Override the behaviour for one id.
    pub fn with(self, id: &str, behaviour: Behaviour) -> Self {
        self.per_id
            .lock()
            .unwrap()
            .insert(EventId::new(id), behaviour);
        self
    }

    /// Let every `Gated` invocation, current and future, complete.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> Vec<EventId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == id)
            .count()
    }

    fn behaviour_for(&self, id: &EventId) -> Behaviour {
        self.per_id
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Workflow for FakeWorkflow {
    fn invoke<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<WorkflowReport>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(id.clone());

            match self.behaviour_for(id) {
                Behaviour::Succeed => Ok(WorkflowReport::success(format!("assessed {id}"))),
                Behaviour::Fail => Ok(WorkflowReport::error(format!("could not assess {id}"))),
                Behaviour::Error => Err(TracewatchError::WorkflowError(format!(
                    "fake workflow error for {id}"
                ))),
                Behaviour::Hang => std::future::pending().await,
                Behaviour::Panic => panic!("fake workflow panic for {id}"),
                Behaviour::Gated => {
                    let mut rx = self.gate.subscribe();
                    let _ = rx.wait_for(|open| *open).await;
                    Ok(WorkflowReport::success(format!("assessed {id}")))
                }
                Behaviour::Delay(d) => {
                    tokio::time::sleep(d).await;
                    Ok(WorkflowReport::success(format!("assessed {id}")))
                }
            }
        })
    }
}
