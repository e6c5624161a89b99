// tests/json_file_store.rs

mod common;
use crate::common::{dispatcher_with, init_tracing, wait_until, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tracewatch::clock::ManualClock;
use tracewatch::source::{
    ChangeSource, PollingOptions, PollingSource, SourceState, StreamingOptions, StreamingSource,
};
use tracewatch::store::{ChangeFeed, EventStore, JsonFileStore};
use tracewatch::types::EventId;
use tracewatch_test_utils::{FakeWorkflow, TraceEventBuilder, ts};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn feed_reports_only_events_added_after_subscribing() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("trace_events.json"));
    store
        .insert(TraceEventBuilder::new("before").created_at(Utc::now()).build())
        .await?;

    let mut sub = store.subscribe().await?;
    store
        .insert(TraceEventBuilder::new("after").created_at(Utc::now()).build())
        .await?;

    let next = with_timeout(sub.next_created()).await?;
    assert_eq!(next, Some(EventId::new("after")));

    sub.close().await?;
    Ok(())
}

#[tokio::test]
async fn streaming_source_over_the_file_store() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let store = Arc::new(JsonFileStore::new(dir.path().join("trace_events.json")));
    let workflow = Arc::new(FakeWorkflow::succeeding());
    let dispatcher = dispatcher_with(workflow.clone());
    let source = Arc::new(StreamingSource::new(
        store.clone(),
        dispatcher.clone(),
        StreamingOptions {
            reconnect_backoff: Duration::from_millis(50),
            close_timeout: Duration::from_millis(200),
        },
    ));

    let mut state = source.subscribe_state();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&source).run(cancel.clone()));
    with_timeout(state.wait_for(|s| *s == SourceState::Listening)).await?;

    store
        .insert(
            TraceEventBuilder::new("evt-1")
                .batch("P20230815001")
                .operation("inbound")
                .created_at(Utc::now())
                .build(),
        )
        .await?;

    with_timeout(wait_until("evt-1 processed", || {
        dispatcher.tracker().has_processed(&EventId::new("evt-1"))
    }))
    .await;
    assert_eq!(workflow.calls_for("evt-1"), 1);

    cancel.cancel();
    with_timeout(handle).await?;
    assert_eq!(source.state(), SourceState::Stopped);

    // Point lookups see what the feed reported.
    assert!(store.get_event(&EventId::new("evt-1")).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn reads_documents_with_stored_field_names() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trace_events.json");
    std::fs::write(
        &path,
        r#"[
            {"_id": "66b1", "batch_id": "P1", "timestamp": "2023-08-15T10:30:00",
             "operation_type": "inbound", "quantity": 50.5, "risk_assessment": null}
        ]"#,
    )?;

    let store = JsonFileStore::new(&path);
    let event = store
        .get_event(&EventId::new("66b1"))
        .await?
        .expect("stored event");
    assert_eq!(event.batch_id, "P1");
    assert_eq!(event.payload.get("quantity"), Some(&serde_json::json!(50.5)));
    assert!(event.result.is_none());
    Ok(())
}

#[tokio::test]
async fn write_back_touches_only_the_target_document() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trace_events.json");
    std::fs::write(
        &path,
        r#"[
            {"_id": "a", "batch_id": "P1", "timestamp": "2023-08-15T10:30:00", "risk_assessment": null},
            {"_id": "b", "batch_id": "P2", "timestamp": "2023-08-15T10:31:00", "risk_assessment": {"level": "low"}},
            {"_id": "c", "timestamp": "2023-08-15T10:32:00", "result": null}
        ]"#,
    )?;
    let read_docs = || -> Result<Vec<serde_json::Value>, Box<dyn Error>> {
        Ok(serde_json::from_str(&std::fs::read_to_string(&path)?)?)
    };
    let before = read_docs()?;

    let store = JsonFileStore::new(&path);
    assert!(store.set_result(&EventId::new("a"), json!({"level": "high"})).await?);
    assert!(store.set_result(&EventId::new("c"), json!({"level": "mid"})).await?);
    assert!(!store.set_result(&EventId::new("zz"), json!({})).await?);

    let after = read_docs()?;
    assert_eq!(after[0]["risk_assessment"], json!({"level": "high"}));
    assert_eq!(after[0]["timestamp"], json!("2023-08-15T10:30:00"));
    assert!(after[0].get("result").is_none());
    // Untouched documents are unchanged, including their stored assessment.
    assert_eq!(after[1], before[1]);
    // A document that already uses `result` keeps using it.
    assert_eq!(after[2]["result"], json!({"level": "mid"}));
    assert!(after[2].get("risk_assessment").is_none());

    // New documents use the stored layout too.
    store
        .insert(TraceEventBuilder::new("d").created_at(Utc::now()).build())
        .await?;
    let after = read_docs()?;
    assert!(after[3].get("risk_assessment").is_some());
    assert_eq!(after[1], before[1]);

    Ok(())
}

#[tokio::test]
async fn malformed_documents_are_skipped_not_fatal() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trace_events.json");
    let good_at = ts(10).to_rfc3339();
    std::fs::write(
        &path,
        format!(
            r#"[
                {{"_id": "bad", "timestamp": null}},
                {{"_id": "good", "timestamp": "{good_at}"}},
                "not even an object"
            ]"#
        ),
    )?;

    let store = Arc::new(JsonFileStore::new(&path));
    assert_eq!(store.all_events().await?.len(), 1);

    let workflow = Arc::new(FakeWorkflow::succeeding());
    let dispatcher = dispatcher_with(workflow.clone());
    let source = PollingSource::new(
        store.clone(),
        dispatcher.clone(),
        Arc::new(ManualClock::new(ts(30))),
        PollingOptions::default(),
    )
    .with_cursor(ts(0));

    let report = source.run_cycle().await?;
    assert_eq!(report.dispatched, 1);
    assert_eq!(source.cursor(), ts(30));

    dispatcher.drain(Duration::from_secs(5)).await;
    assert_eq!(workflow.calls_for("good"), 1);
    assert_eq!(workflow.calls_for("bad"), 0);

    // The bad document survives later writes untouched.
    assert!(store.set_result(&EventId::new("good"), json!({"level": "low"})).await?);
    let docs: Vec<serde_json::Value> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(docs[0], json!({"_id": "bad", "timestamp": null}));
    assert_eq!(docs[2], json!("not even an object"));

    Ok(())
}

#[tokio::test]
async fn non_array_file_is_a_store_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trace_events.json");
    std::fs::write(&path, r#"{"_id": "a"}"#)?;

    let err = JsonFileStore::new(&path).all_events().await.unwrap_err();
    assert!(err.to_string().contains("JSON array"), "{err}");
    Ok(())
}
