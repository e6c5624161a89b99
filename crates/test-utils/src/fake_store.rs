use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracewatch::errors::{Result, TracewatchError};
use tracewatch::store::{EventStore, MemoryStore, TraceEvent};
use tracewatch::types::{BoxFuture, EventId};

/// An `EventStore` over a `MemoryStore` with failure injection.
///
/// - records every window it is asked to scan
/// - fails the next N scans on request
/// - can fail point lookups
pub struct ScriptedStore {
    inner: MemoryStore,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    failing_scans: AtomicUsize,
    fail_lookups: AtomicBool,
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            windows: Mutex::new(Vec::new()),
            failing_scans: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, event: TraceEvent) {
        self.inner.insert(event);
    }

    /// The next `n` calls to `events_created_between` return an error.
    pub fn fail_next_scans(&self, n: usize) {
        self.failing_scans.store(n, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Every `(after, until)` window requested so far, failed ones included.
    pub fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }

    pub fn result_of(&self, id: &EventId) -> Option<Value> {
        self.inner.result_of(id)
    }

    fn take_scan_failure(&self) -> bool {
        self.failing_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl EventStore for ScriptedStore {
    fn events_created_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TraceEvent>>> {
        Box::pin(async move {
            self.windows.lock().unwrap().push((after, until));
            if self.take_scan_failure() {
                return Err(TracewatchError::StoreError(
                    "scripted scan failure".to_string(),
                ));
            }
            self.inner.events_created_between(after, until).await
        })
    }

    fn get_event<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<Option<TraceEvent>>> {
        Box::pin(async move {
            if self.fail_lookups.load(Ordering::SeqCst) {
                return Err(TracewatchError::StoreError(
                    "scripted lookup failure".to_string(),
                ));
            }
            self.inner.get_event(id).await
        })
    }

    fn set_result<'a>(&'a self, id: &'a EventId, result: Value) -> BoxFuture<'a, Result<bool>> {
        self.inner.set_result(id, result)
    }
}
