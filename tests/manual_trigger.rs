// tests/manual_trigger.rs

mod common;
use crate::common::{dispatcher_with, init_tracing, wait_until, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracewatch::dispatch::{DispatchOutcome, ManualTrigger, TriggerOutcome};
use tracewatch::tracker::EventPhase;
use tracewatch::types::EventId;
use tracewatch_test_utils::{Behaviour, FakeWorkflow, ScriptedStore, TraceEventBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn store_with(ids: &[&str]) -> Arc<ScriptedStore> {
    let store = Arc::new(ScriptedStore::new());
    for (i, id) in ids.iter().enumerate() {
        store.insert(TraceEventBuilder::new(id).at(i as i64).build());
    }
    store
}

#[tokio::test]
async fn unknown_event_is_not_found_and_not_claimed() -> TestResult {
    init_tracing();

    let store = store_with(&[]);
    let workflow = Arc::new(FakeWorkflow::succeeding());
    let dispatcher = dispatcher_with(workflow.clone());
    let trigger = ManualTrigger::new(store, dispatcher.clone());

    let id = EventId::new("missing");
    assert_eq!(trigger.try_claim_and_dispatch(&id).await?, TriggerOutcome::NotFound);
    assert!(dispatcher.tracker().state(&id).is_none());
    assert_eq!(workflow.call_count(), 0);

    Ok(())
}

#[tokio::test]
async fn store_lookup_errors_are_returned() {
    init_tracing();

    let store = store_with(&["e1"]);
    store.fail_lookups(true);
    let dispatcher = dispatcher_with(Arc::new(FakeWorkflow::succeeding()));
    let trigger = ManualTrigger::new(store, dispatcher.clone());

    let id = EventId::new("e1");
    assert!(trigger.try_claim_and_dispatch(&id).await.is_err());
    assert!(!dispatcher.tracker().is_processing(&id));
}

#[tokio::test]
async fn concurrent_triggers_dispatch_once() -> TestResult {
    init_tracing();

    let store = store_with(&["e1"]);
    let workflow = Arc::new(FakeWorkflow::new(Behaviour::Gated));
    let dispatcher = dispatcher_with(workflow.clone());
    let trigger = ManualTrigger::new(store, dispatcher.clone());
    let id = EventId::new("e1");

    let (a, b, c) = tokio::join!(
        trigger.try_claim_and_dispatch(&id),
        trigger.try_claim_and_dispatch(&id),
        trigger.try_claim_and_dispatch(&id),
    );
    let outcomes = [a?, b?, c?];

    let dispatched = outcomes
        .iter()
        .filter(|o| **o == TriggerOutcome::Dispatched)
        .count();
    let busy = outcomes
        .iter()
        .filter(|o| **o == TriggerOutcome::AlreadyProcessing)
        .count();
    assert_eq!((dispatched, busy), (1, 2));

    workflow.release();
    let drained = dispatcher.drain(Duration::from_secs(5)).await;
    assert!(drained.completed);

    assert_eq!(
        trigger.try_claim_and_dispatch(&id).await?,
        TriggerOutcome::AlreadyProcessed
    );
    assert_eq!(workflow.calls_for("e1"), 1);

    Ok(())
}

#[tokio::test]
async fn manual_and_automatic_paths_share_the_claim() -> TestResult {
    init_tracing();

    let store = store_with(&["e1"]);
    let workflow = Arc::new(FakeWorkflow::new(Behaviour::Gated));
    let dispatcher = dispatcher_with(workflow.clone());
    let trigger = ManualTrigger::new(store, dispatcher.clone());
    let id = EventId::new("e1");

    assert_eq!(dispatcher.dispatch(&id, "polling"), DispatchOutcome::Dispatched);
    assert_eq!(
        trigger.try_claim_and_dispatch(&id).await?,
        TriggerOutcome::AlreadyProcessing
    );

    workflow.release();
    with_timeout(wait_until("e1 processed", || dispatcher.tracker().has_processed(&id))).await;
    assert_eq!(dispatcher.dispatch(&id, "streaming"), DispatchOutcome::AlreadyProcessed);
    assert_eq!(workflow.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn failures_and_panics_are_recorded_and_not_retried() -> TestResult {
    init_tracing();

    let store = store_with(&["fails", "errors", "panics", "ok"]);
    let workflow = Arc::new(
        FakeWorkflow::succeeding()
            .with("fails", Behaviour::Fail)
            .with("errors", Behaviour::Error)
            .with("panics", Behaviour::Panic),
    );
    let dispatcher = dispatcher_with(workflow.clone());
    let trigger = ManualTrigger::new(store, dispatcher.clone());

    for id in ["fails", "errors", "panics", "ok"] {
        let outcome = trigger.try_claim_and_dispatch(&EventId::new(id)).await?;
        assert_eq!(outcome, TriggerOutcome::Dispatched, "{id}");
    }
    assert!(dispatcher.drain(Duration::from_secs(5)).await.completed);

    let tracker = dispatcher.tracker();
    for (id, expected) in [("fails", false), ("errors", false), ("panics", false), ("ok", true)] {
        let state = tracker.state(&EventId::new(id)).expect("tracked");
        assert_eq!(state.phase, EventPhase::Processed, "{id}");
        assert_eq!(state.success, Some(expected), "{id}");
    }
    let stats = tracker.stats();
    assert_eq!((stats.succeeded, stats.failed), (1, 3));

    // A failed event stays processed; re-triggering does not run it again.
    assert_eq!(
        trigger.try_claim_and_dispatch(&EventId::new("fails")).await?,
        TriggerOutcome::AlreadyProcessed
    );
    assert_eq!(workflow.calls_for("fails"), 1);

    Ok(())
}
