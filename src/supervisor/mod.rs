// src/supervisor/mod.rs

//! Lifecycle owner for the detection loops.
//!
//! Each registered [`ChangeSource`] runs as its own Tokio task under a child
//! of the supervisor's root [`CancellationToken`]. [`TaskSupervisor::stop_all`]
//! cancels them, then waits for the loops and the dispatcher's in-flight
//! workflows under a single deadline. Anything still alive at the deadline is
//! aborted and reported; shutdown never fails.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::source::ChangeSource;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningActivity {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What [`TaskSupervisor::stop_all`] observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops that exited on their own after cancellation.
    pub stopped: Vec<String>,
    /// Loops whose task ended abnormally (panic), with the join error.
    pub failed: Vec<(String, String)>,
    /// Loops still running at the deadline and aborted.
    pub forced: Vec<String>,
    /// In-flight workflows force-cancelled at the deadline.
    pub abandoned_dispatches: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True if everything stopped cooperatively within the timeout.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.forced.is_empty() && self.abandoned_dispatches == 0
    }
}

pub struct TaskSupervisor {
    sources: Vec<Arc<dyn ChangeSource>>,
    running: HashMap<String, RunningActivity>,
    dispatcher: Option<Arc<Dispatcher>>,
    shutdown_timeout: Duration,
    root: CancellationToken,
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("running", &self.running())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

impl TaskSupervisor {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            sources: Vec::new(),
            running: HashMap::new(),
            dispatcher: None,
            shutdown_timeout,
            root: CancellationToken::new(),
        }
    }

    /// Also drain this dispatcher's in-flight workflows on shutdown.
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Add a source. Names must be unique; a duplicate is ignored.
    pub fn register(&mut self, source: Arc<dyn ChangeSource>) {
        if self.sources.iter().any(|s| s.name() == source.name()) {
            warn!(source = source.name(), "source already registered; ignoring");
            return;
        }
        debug!(source = source.name(), "source registered");
        self.sources.push(source);
    }

    /// Whether the loop called `name` is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .get(name)
            .is_some_and(|activity| !activity.handle.is_finished())
    }

    /// Names of running loops, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .running
            .iter()
            .filter(|(_, activity)| !activity.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Spawn every registered source that is not already running.
    ///
    /// Returns how many loops were started. Calling this while everything
    /// runs is a logged no-op. Must be called from within a Tokio runtime.
    pub fn start_all(&mut self) -> usize {
        // Loops that exited on their own (a panic, typically) may be restarted.
        self.running.retain(|_, activity| !activity.handle.is_finished());

        if self.running.is_empty() {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.reopen();
            }
        }

        let mut started = 0;
        for source in &self.sources {
            let name = source.name().to_string();
            if self.running.contains_key(&name) {
                continue;
            }

            let cancel = self.root.child_token();
            let handle = tokio::spawn(Arc::clone(source).run(cancel.clone()));
            info!(source = %name, "source started");
            self.running.insert(name, RunningActivity { cancel, handle });
            started += 1;
        }

        if started == 0 {
            warn!(
                registered = self.sources.len(),
                "start_all: nothing to start; all registered sources already running"
            );
        }
        started
    }

    /// Cancel every loop and wait for them, then drain in-flight workflows,
    /// all within the shutdown timeout.
    pub async fn stop_all(&mut self) -> ShutdownReport {
        let started_at = Instant::now();
        let deadline = started_at + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        let mut activities: Vec<(String, RunningActivity)> = self.running.drain().collect();
        activities.sort_by(|a, b| a.0.cmp(&b.0));

        if !activities.is_empty() {
            info!(
                count = activities.len(),
                timeout = ?self.shutdown_timeout,
                "stopping sources"
            );
        }
        for (_, activity) in &activities {
            activity.cancel.cancel();
        }

        for (name, activity) in activities {
            let mut handle = activity.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    debug!(source = %name, "source stopped");
                    report.stopped.push(name);
                }
                Ok(Err(join_err)) => {
                    error!(source = %name, error = %join_err, "source task ended abnormally");
                    report.failed.push((name, join_err.to_string()));
                }
                Err(_) => {
                    warn!(source = %name, "source did not stop in time; aborting");
                    handle.abort();
                    report.forced.push(name);
                }
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let drained = dispatcher.drain(remaining).await;
            report.abandoned_dispatches = drained.forced;
        }

        report.elapsed = started_at.elapsed();
        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            forced = report.forced.len(),
            abandoned_dispatches = report.abandoned_dispatches,
            elapsed = ?report.elapsed,
            "shutdown complete"
        );
        report
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
