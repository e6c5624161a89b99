// src/dispatch/dispatcher.rs

//! Claim-guarded workflow dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::tracker::EventTracker;
use crate::types::EventId;
use crate::workflow::Workflow;

/// What happened to one dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Another path holds the claim and its workflow is still running.
    AlreadyProcessing,
    /// The event was already completed (successfully or not).
    AlreadyProcessed,
    /// This call won the claim; the workflow is running in its own task.
    Dispatched,
}

/// Result of [`Dispatcher::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Every in-flight dispatch finished within the timeout.
    pub completed: bool,
    /// Dispatches still running at the deadline and force-cancelled.
    pub forced: usize,
}

/// Bridges a detected event id to one workflow invocation.
///
/// Shared by every change source and by [`super::ManualTrigger`]; since all
/// of them claim through the same [`EventTracker`], an event reported by
/// several paths is still dispatched once.
pub struct Dispatcher {
    tracker: Arc<EventTracker>,
    workflow: Arc<dyn Workflow>,
    tasks: TaskTracker,
    /// Cancelled to force-stop in-flight workflows at shutdown.
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tracker", &self.tracker)
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(tracker: Arc<EventTracker>, workflow: Arc<dyn Workflow>) -> Self {
        Self {
            tracker,
            workflow,
            tasks: TaskTracker::new(),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<EventTracker> {
        &self.tracker
    }

    /// Number of dispatched workflows that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Claim `id` and, if the claim succeeds, start its workflow without
    /// waiting for it.
    ///
    /// `origin` names the calling path for logs (`"polling"`, `"manual"`, ...).
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, id: &EventId, origin: &str) -> DispatchOutcome {
        if self.tracker.is_processing(id) {
            debug!(event_id = %id, origin, "event already processing; skipping");
            return DispatchOutcome::AlreadyProcessing;
        }
        if self.tracker.has_processed(id) {
            debug!(event_id = %id, origin, "event already processed; skipping");
            return DispatchOutcome::AlreadyProcessed;
        }

        // The reads above are a fast path only; the claim is what decides.
        if !self.tracker.mark_as_processing(id) {
            debug!(event_id = %id, origin, "lost claim race; skipping");
            return if self.tracker.has_processed(id) {
                DispatchOutcome::AlreadyProcessed
            } else {
                DispatchOutcome::AlreadyProcessing
            };
        }

        info!(event_id = %id, origin, "dispatching workflow");
        self.spawn_workflow(id.clone());
        DispatchOutcome::Dispatched
    }

    fn spawn_workflow(&self, id: EventId) {
        let tracker = Arc::clone(&self.tracker);
        let workflow = Arc::clone(&self.workflow);
        let cancel = self.cancel_token();

        self.tasks.spawn(async move {
            // Run the workflow in its own task so a panic surfaces as a
            // JoinError here instead of unwinding through this task.
            let invoke_id = id.clone();
            let mut invocation =
                tokio::spawn(async move { workflow.invoke(&invoke_id).await });
            let abort = invocation.abort_handle();

            let success = tokio::select! {
                joined = &mut invocation => match joined {
                    Ok(Ok(report)) => {
                        info!(
                            event_id = %id,
                            status = %report.status,
                            message = %report.message,
                            "workflow finished"
                        );
                        report.is_success()
                    }
                    Ok(Err(e)) => {
                        error!(event_id = %id, error = %e, "workflow failed");
                        false
                    }
                    Err(join_err) => {
                        error!(event_id = %id, error = %join_err, "workflow task panicked or was aborted");
                        false
                    }
                },
                () = cancel.cancelled() => {
                    abort.abort();
                    warn!(event_id = %id, "workflow cancelled during shutdown");
                    false
                }
            };

            tracker.mark_as_processed(&id, success);
        });
    }

    /// Wait up to `timeout` for in-flight workflows; past that, cancel the
    /// rest. Cancelled workflows are recorded as failed.
    ///
    /// New dispatches are still accepted; call [`Dispatcher::reopen`] before
    /// reuse so the forced cancellation does not apply to them.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.tasks.close();

        let in_flight = self.tasks.len();
        if in_flight > 0 {
            info!(in_flight, ?timeout, "waiting for in-flight workflows");
        }

        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => DrainReport {
                completed: true,
                forced: 0,
            },
            Err(_) => {
                let forced = self.tasks.len();
                warn!(forced, "workflows still running at deadline; forcing cancellation");
                self.cancel_token().cancel();
                DrainReport {
                    completed: false,
                    forced,
                }
            }
        }
    }

    /// Re-arm after [`Dispatcher::drain`].
    pub fn reopen(&self) {
        self.tasks.reopen();
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }
}
