// tests/supervisor_shutdown.rs

mod common;
use crate::common::{dispatcher_with, init_tracing, wait_until, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tracewatch::clock::SystemClock;
use tracewatch::dispatch::DispatchOutcome;
use tracewatch::source::{
    ChangeSource, PollingOptions, PollingSource, SourceState, StreamingOptions, StreamingSource,
};
use tracewatch::supervisor::TaskSupervisor;
use tracewatch::types::EventId;
use tracewatch_test_utils::{Behaviour, FakeWorkflow, ScriptedFeed, ScriptedStore, TraceEventBuilder};

#[tokio::test]
async fn both_detectors_share_one_claim_per_event() {
    init_tracing();

    let store = Arc::new(ScriptedStore::new());
    let feed = Arc::new(ScriptedFeed::new());
    let workflow = Arc::new(FakeWorkflow::succeeding());
    let dispatcher = dispatcher_with(workflow.clone());

    let polling = Arc::new(PollingSource::new(
        store.clone(),
        dispatcher.clone(),
        Arc::new(SystemClock),
        PollingOptions {
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        },
    ));
    let streaming = Arc::new(StreamingSource::new(
        feed.clone(),
        dispatcher.clone(),
        StreamingOptions {
            reconnect_backoff: Duration::from_millis(20),
            close_timeout: Duration::from_millis(100),
        },
    ));

    let mut supervisor =
        TaskSupervisor::new(Duration::from_secs(2)).with_dispatcher(dispatcher.clone());
    supervisor.register(polling.clone());
    supervisor.register(streaming.clone());
    assert_eq!(supervisor.start_all(), 2);
    assert_eq!(
        supervisor.running(),
        vec!["polling".to_string(), "streaming".to_string()]
    );

    with_timeout(wait_until("streaming subscribed", || feed.open_subscriptions() == 1)).await;

    // The same creation, seen by both paths.
    let created_at = Utc::now() + chrono::Duration::milliseconds(30);
    store.insert(TraceEventBuilder::new("dup").created_at(created_at).build());
    feed.push("dup");

    with_timeout(wait_until("dup processed", || {
        dispatcher.tracker().has_processed(&EventId::new("dup"))
    }))
    .await;
    // Give the poller a chance to see it too.
    with_timeout(wait_until("polling window passed the event", || polling.cursor() > created_at))
        .await;

    let report = supervisor.stop_all().await;
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(workflow.calls_for("dup"), 1);
    assert_eq!(polling.state(), SourceState::Stopped);
    assert_eq!(streaming.state(), SourceState::Stopped);
    assert!(supervisor.running().is_empty());
}

#[tokio::test]
async fn hanging_workflow_is_forced_within_the_shutdown_timeout() {
    init_tracing();

    let workflow = Arc::new(FakeWorkflow::succeeding().with("stuck", Behaviour::Hang));
    let dispatcher = dispatcher_with(workflow.clone());
    let mut supervisor =
        TaskSupervisor::new(Duration::from_millis(150)).with_dispatcher(dispatcher.clone());
    supervisor.start_all();

    let stuck = EventId::new("stuck");
    assert_eq!(dispatcher.dispatch(&stuck, "test"), DispatchOutcome::Dispatched);
    with_timeout(wait_until("workflow started", || workflow.calls_for("stuck") == 1)).await;

    let report = with_timeout(supervisor.stop_all()).await;
    assert_eq!(report.abandoned_dispatches, 1);
    assert!(!report.is_clean());
    assert!(report.elapsed < Duration::from_secs(1), "{:?}", report.elapsed);

    // The forced dispatch is recorded as a failure.
    with_timeout(wait_until("stuck recorded", || dispatcher.tracker().has_processed(&stuck))).await;
    assert_eq!(
        dispatcher.tracker().state(&stuck).and_then(|s| s.success),
        Some(false)
    );

    // After a restart, new dispatches are not affected by the old cancellation.
    supervisor.start_all();
    let fresh = EventId::new("fresh");
    assert_eq!(dispatcher.dispatch(&fresh, "test"), DispatchOutcome::Dispatched);
    with_timeout(wait_until("fresh processed", || dispatcher.tracker().has_processed(&fresh)))
        .await;
    assert_eq!(
        dispatcher.tracker().state(&fresh).and_then(|s| s.success),
        Some(true)
    );

    let report = supervisor.stop_all().await;
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn in_flight_workflows_finish_before_a_clean_shutdown() {
    init_tracing();

    let workflow = Arc::new(FakeWorkflow::new(Behaviour::Delay(Duration::from_millis(50))));
    let dispatcher = dispatcher_with(workflow.clone());
    let mut supervisor =
        TaskSupervisor::new(Duration::from_secs(2)).with_dispatcher(dispatcher.clone());
    supervisor.start_all();

    for id in ["a", "b", "c"] {
        dispatcher.dispatch(&EventId::new(id), "test");
    }

    let report = supervisor.stop_all().await;
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(dispatcher.in_flight(), 0);
    assert_eq!(dispatcher.tracker().stats().succeeded, 3);
}
