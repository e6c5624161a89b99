// src/source/polling.rs

//! Windowed polling detector.
//!
//! Each cycle scans `(cursor, now]` and dispatches every event found. The
//! cursor only moves after a scan succeeded, so a failed window is retried
//! as a whole on the next cycle instead of being skipped. Events seen twice
//! (for example on a retried window) are filtered by the tracker; events
//! that already carry a result were assessed elsewhere and are not
//! dispatched at all.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::errors::Result;
use crate::source::{ChangeSource, SourceState, StateCell, sleep_or_cancel};
use crate::store::EventStore;
use crate::types::BoxFuture;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingOptions {
    /// Pause between successful cycles.
    pub poll_interval: Duration,
    /// Pause after a failed scan before retrying the same window.
    pub error_backoff: Duration,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

/// Outcome of one successful scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Exclusive lower bound of the scanned window.
    pub after: DateTime<Utc>,
    /// Inclusive upper bound; the cursor's new value.
    pub until: DateTime<Utc>,
    pub found: usize,
    /// Found events that already had a result.
    pub skipped: usize,
    pub dispatched: usize,
}

pub struct PollingSource {
    name: String,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    options: PollingOptions,
    cursor: Mutex<DateTime<Utc>>,
    state: StateCell,
}

impl std::fmt::Debug for PollingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingSource")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("cursor", &self.cursor())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl PollingSource {
    /// The cursor starts at the clock's current time: events created before
    /// startup are not picked up.
    pub fn new(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        options: PollingOptions,
    ) -> Self {
        let cursor = clock.now();
        Self {
            name: "polling".to_string(),
            store,
            dispatcher,
            clock,
            options,
            cursor: Mutex::new(cursor),
            state: StateCell::new(),
        }
    }

    /// Start scanning from `cursor` instead of the current time.
    pub fn with_cursor(self, cursor: DateTime<Utc>) -> Self {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = cursor;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn options(&self) -> PollingOptions {
        self.options
    }

    /// Last timestamp known to be fully scanned.
    pub fn cursor(&self) -> DateTime<Utc> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance_cursor(&self, to: DateTime<Utc>) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        // A clock stepping backwards must not rewind the cursor.
        if to > *cursor {
            *cursor = to;
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    /// Run one scan-and-dispatch cycle.
    ///
    /// On error the cursor is untouched and the same window will be scanned
    /// again.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.state.set(SourceState::Scanning);

        let until = self.clock.now();
        let after = self.cursor();
        debug!(source = %self.name, %after, %until, "scanning window");

        let events = self.store.events_created_between(after, until).await?;

        self.state.set(SourceState::Dispatching);
        let found = events.len();
        let mut skipped = 0;
        let mut dispatched = 0;
        for event in &events {
            if event.result.is_some() {
                debug!(source = %self.name, event_id = %event.id, "event already has a result; skipping");
                skipped += 1;
                continue;
            }
            if self.dispatcher.dispatch(&event.id, &self.name) == DispatchOutcome::Dispatched {
                dispatched += 1;
            }
        }

        self.advance_cursor(until);

        if found > 0 {
            info!(source = %self.name, found, skipped, dispatched, %after, %until, "new events found");
        }

        Ok(CycleReport {
            after,
            until,
            found,
            skipped,
            dispatched,
        })
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            source = %self.name,
            poll_interval = ?self.options.poll_interval,
            cursor = %self.cursor(),
            "polling source started"
        );

        while !cancel.is_cancelled() {
            let cycle = tokio::select! {
                () = cancel.cancelled() => break,
                res = self.run_cycle() => res,
            };

            let pause = match cycle {
                Ok(_) => self.options.poll_interval,
                Err(e) => {
                    error!(
                        source = %self.name,
                        error = %e,
                        cursor = %self.cursor(),
                        backoff = ?self.options.error_backoff,
                        "scan failed; retrying same window after backoff"
                    );
                    self.options.error_backoff
                }
            };

            self.state.set(SourceState::Sleeping);
            if !sleep_or_cancel(&cancel, pause).await {
                break;
            }
        }

        self.state.set(SourceState::Stopped);
        info!(source = %self.name, "polling source stopped");
    }
}

impl ChangeSource for PollingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Arc<Self>, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(self.run_loop(cancel))
    }

    fn state(&self) -> SourceState {
        self.state.get()
    }
}
