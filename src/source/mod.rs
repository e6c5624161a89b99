// src/source/mod.rs

//! Change sources: background loops that discover newly created events and
//! hand their ids to the [`Dispatcher`](crate::dispatch::Dispatcher).
//!
//! - [`polling::PollingSource`] scans the store in time windows. Works
//!   against any [`EventStore`](crate::store::EventStore).
//! - [`streaming::StreamingSource`] subscribes to a
//!   [`ChangeFeed`](crate::store::ChangeFeed) for lower latency and
//!   reconnects with a fixed backoff.
//!
//! Both run until their cancellation token fires and publish their current
//! [`SourceState`] on a watch channel.

pub mod polling;
pub mod streaming;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::BoxFuture;

pub use polling::{CycleReport, PollingOptions, PollingSource};
pub use streaming::{StreamingOptions, StreamingSource};

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, loop not started.
    Idle,
    /// Polling: querying the current window.
    Scanning,
    /// Handing found ids to the dispatcher.
    Dispatching,
    /// Waiting for the next cycle or a reconnect backoff.
    Sleeping,
    /// Streaming: opening a subscription.
    Connecting,
    /// Streaming: waiting for the next notification.
    Listening,
    /// Loop exited after cancellation.
    Stopped,
}

/// A long-lived detection loop owned by the
/// [`TaskSupervisor`](crate::supervisor::TaskSupervisor).
pub trait ChangeSource: Send + Sync {
    /// Stable name, used as the supervisor's activity key and in logs.
    fn name(&self) -> &str;

    /// Run until `cancel` fires. Must not return early on transient errors.
    fn run(self: Arc<Self>, cancel: CancellationToken) -> BoxFuture<'static, ()>;

    fn state(&self) -> SourceState;
}

/// Sleep for `duration` unless cancelled first. Returns `false` if cancelled.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// State publisher shared by both sources.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<SourceState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SourceState::Idle);
        Self { tx }
    }

    pub(crate) fn set(&self, state: SourceState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn get(&self) -> SourceState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SourceState> {
        self.tx.subscribe()
    }
}
