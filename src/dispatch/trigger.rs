// src/dispatch/trigger.rs

//! Manual re-trigger entry point for an HTTP layer or the CLI.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::errors::Result;
use crate::store::EventStore;
use crate::types::EventId;

/// Response of [`ManualTrigger::try_claim_and_dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    AlreadyProcessing,
    AlreadyProcessed,
    Dispatched,
    NotFound,
}

impl TriggerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerOutcome::AlreadyProcessing => "already_processing",
            TriggerOutcome::AlreadyProcessed => "already_processed",
            TriggerOutcome::Dispatched => "dispatched",
            TriggerOutcome::NotFound => "not_found",
        }
    }
}

impl From<DispatchOutcome> for TriggerOutcome {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::AlreadyProcessing => TriggerOutcome::AlreadyProcessing,
            DispatchOutcome::AlreadyProcessed => TriggerOutcome::AlreadyProcessed,
            DispatchOutcome::Dispatched => TriggerOutcome::Dispatched,
        }
    }
}

/// Runs the same claim protocol as the change sources, so a manual trigger
/// can never double-dispatch an event that was also detected automatically.
#[derive(Clone)]
pub struct ManualTrigger {
    store: Arc<dyn EventStore>,
    dispatcher: Arc<Dispatcher>,
}

impl ManualTrigger {
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn try_claim_and_dispatch(&self, id: &EventId) -> Result<TriggerOutcome> {
        info!(event_id = %id, "manual trigger requested");

        if self.store.get_event(id).await?.is_none() {
            info!(event_id = %id, "manual trigger for unknown event");
            return Ok(TriggerOutcome::NotFound);
        }

        Ok(self.dispatcher.dispatch(id, "manual").into())
    }
}
