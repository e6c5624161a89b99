// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod types;
pub mod workflow;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use crate::cli::{CliArgs, Command};
use crate::clock::{Clock, SystemClock};
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::dispatch::{Dispatcher, ManualTrigger, TriggerOutcome};
use crate::source::{PollingSource, StreamingSource};
use crate::store::JsonFileStore;
use crate::supervisor::TaskSupervisor;
use crate::tracker::EventTracker;
use crate::types::EventId;
use crate::workflow::CommandWorkflow;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (file + `TRACEWATCH_*` overrides)
/// - the JSON file store and the command workflow
/// - tracker / dispatcher
/// - the change sources selected by `[detector].mode`
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("failed to load config from '{}'", args.config))?;

    match args.command {
        Command::Check => {
            print_config(&args.config, &cfg);
            Ok(())
        }
        Command::Run => run_detectors(&cfg).await,
        Command::Trigger { id } => trigger_once(&cfg, EventId::new(id)).await,
    }
}

struct Services {
    store: Arc<JsonFileStore>,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
}

fn build_services(cfg: &ConfigFile) -> Result<Services> {
    let cmd = cfg.require_workflow_cmd()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(JsonFileStore::new(&cfg.store_path));
    let tracker = Arc::new(EventTracker::with_clock(cfg.tracker, Arc::clone(&clock)));
    let workflow = Arc::new(CommandWorkflow::new(cmd).with_store(store.clone()));
    let dispatcher = Arc::new(Dispatcher::new(tracker, workflow));

    Ok(Services {
        store,
        clock,
        dispatcher,
    })
}

async fn run_detectors(cfg: &ConfigFile) -> Result<()> {
    // The file feed watches the store's directory, which must exist.
    if let Some(parent) = cfg.store_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory '{}'", parent.display())
            })?;
        }
    }

    let services = build_services(cfg)?;

    let mut supervisor =
        TaskSupervisor::new(cfg.shutdown_timeout).with_dispatcher(services.dispatcher.clone());

    if cfg.mode.polling() {
        supervisor.register(Arc::new(PollingSource::new(
            services.store.clone(),
            services.dispatcher.clone(),
            services.clock.clone(),
            cfg.polling,
        )));
    }
    if cfg.mode.streaming() {
        supervisor.register(Arc::new(StreamingSource::new(
            services.store.clone(),
            services.dispatcher.clone(),
            cfg.streaming,
        )));
    }

    info!(
        mode = %cfg.mode,
        store = %cfg.store_path.display(),
        "tracewatch running; press Ctrl-C to stop"
    );
    supervisor.start_all();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C; shutting down");
    }

    let report = supervisor.stop_all().await;
    let stats = services.dispatcher.tracker().stats();
    info!(
        clean = report.is_clean(),
        processed = stats.processed,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "tracewatch stopped"
    );
    Ok(())
}

async fn trigger_once(cfg: &ConfigFile, id: EventId) -> Result<()> {
    let services = build_services(cfg)?;
    let trigger = ManualTrigger::new(services.store.clone(), services.dispatcher.clone());

    let outcome = trigger.try_claim_and_dispatch(&id).await?;
    println!("{}", outcome.as_str());

    match outcome {
        TriggerOutcome::NotFound => bail!("event '{id}' not found in {}", cfg.store_path.display()),
        TriggerOutcome::Dispatched => {}
        // A fresh process has an empty tracker, so these only show up if the
        // store hands out duplicate ids.
        TriggerOutcome::AlreadyProcessing | TriggerOutcome::AlreadyProcessed => return Ok(()),
    }

    let dispatcher = &services.dispatcher;
    tokio::select! {
        _ = dispatcher.drain(Duration::MAX) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!(event_id = %id, "interrupted; cancelling workflow");
            dispatcher.drain(cfg.shutdown_timeout).await;
        }
    }

    match dispatcher.tracker().state(&id).and_then(|s| s.success) {
        Some(true) => {
            println!("success");
            Ok(())
        }
        Some(false) => {
            println!("failed");
            bail!("workflow for event '{id}' did not succeed")
        }
        None => bail!("workflow for event '{id}' did not complete"),
    }
}

/// Print the effective settings after defaults and overrides.
fn print_config(path: &str, cfg: &ConfigFile) {
    println!("tracewatch config check: {path}");
    println!("  detector.mode = {}", cfg.mode);
    println!("  detector.poll_interval = {:?}", cfg.polling.poll_interval);
    println!("  detector.error_backoff = {:?}", cfg.polling.error_backoff);
    println!(
        "  detector.reconnect_backoff = {:?}",
        cfg.streaming.reconnect_backoff
    );
    println!("  detector.close_timeout = {:?}", cfg.streaming.close_timeout);
    println!("  tracker.retention = {:?}", cfg.tracker.retention);
    println!("  tracker.capacity = {}", cfg.tracker.capacity);
    println!("  supervisor.shutdown_timeout = {:?}", cfg.shutdown_timeout);
    println!("  store.path = {}", cfg.store_path.display());
    match &cfg.workflow_cmd {
        Some(cmd) => println!("  workflow.cmd = {cmd}"),
        None => println!("  workflow.cmd = (unset; required for run and trigger)"),
    }

    debug!("config check complete");
}
