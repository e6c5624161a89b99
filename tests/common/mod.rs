#![allow(dead_code)]

use std::sync::Arc;

use tracewatch::dispatch::Dispatcher;
use tracewatch::tracker::EventTracker;
use tracewatch::workflow::Workflow;

pub use tracewatch_test_utils::{init_tracing, wait_until, with_timeout};

/// A dispatcher over a fresh default tracker.
pub fn dispatcher_with(workflow: Arc<dyn Workflow>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(Arc::new(EventTracker::default()), workflow))
}
