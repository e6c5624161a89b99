// src/source/streaming.rs

//! Push-based detector over a store change feed.
//!
//! Stream termination is routine (connectivity loss, server-side
//! invalidation, auth expiry): the loop closes what it has, waits out the
//! reconnect backoff and subscribes again, for as long as it is not
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::errors::TracewatchError;
use crate::source::{ChangeSource, SourceState, StateCell, sleep_or_cancel};
use crate::store::{ChangeFeed, ChangeSubscription};
use crate::types::BoxFuture;

pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingOptions {
    /// Pause before resubscribing after a failure or stream end.
    pub reconnect_backoff: Duration,
    /// Bound on a graceful subscription close; the subscription is dropped
    /// once it elapses.
    pub close_timeout: Duration,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Why a subscription stopped being consumed.
#[derive(Debug)]
enum StreamEnd {
    Cancelled,
    Ended,
    Failed(TracewatchError),
}

pub struct StreamingSource {
    name: String,
    feed: Arc<dyn ChangeFeed>,
    dispatcher: Arc<Dispatcher>,
    options: StreamingOptions,
    state: StateCell,
}

impl std::fmt::Debug for StreamingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSource")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl StreamingSource {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        dispatcher: Arc<Dispatcher>,
        options: StreamingOptions,
    ) -> Self {
        Self {
            name: "streaming".to_string(),
            feed,
            dispatcher,
            options,
            state: StateCell::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn options(&self) -> StreamingOptions {
        self.options
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    async fn consume(
        &self,
        sub: &mut Box<dyn ChangeSubscription>,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                next = sub.next_created() => next,
            };

            match next {
                Ok(Some(id)) => {
                    debug!(source = %self.name, event_id = %id, "creation notification received");
                    self.dispatcher.dispatch(&id, &self.name);
                }
                Ok(None) => return StreamEnd::Ended,
                Err(e) => return StreamEnd::Failed(e),
            }
        }
    }

    async fn close(&self, sub: Box<dyn ChangeSubscription>) {
        match tokio::time::timeout(self.options.close_timeout, sub.close()).await {
            Ok(Ok(())) => debug!(source = %self.name, "subscription closed"),
            Ok(Err(e)) => warn!(source = %self.name, error = %e, "error while closing subscription"),
            Err(_) => warn!(
                source = %self.name,
                timeout = ?self.options.close_timeout,
                "subscription did not close in time; dropped"
            ),
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            source = %self.name,
            reconnect_backoff = ?self.options.reconnect_backoff,
            "streaming source started"
        );

        while !cancel.is_cancelled() {
            self.state.set(SourceState::Connecting);

            let subscribed = tokio::select! {
                () = cancel.cancelled() => break,
                res = self.feed.subscribe() => res,
            };

            match subscribed {
                Ok(mut sub) => {
                    info!(source = %self.name, "change feed subscription active");
                    self.state.set(SourceState::Listening);

                    let end = self.consume(&mut sub, &cancel).await;
                    self.close(sub).await;

                    match end {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Ended => {
                            info!(source = %self.name, "change stream ended; will resubscribe")
                        }
                        StreamEnd::Failed(e) => error!(
                            source = %self.name,
                            error = %e,
                            "change stream failed; will resubscribe"
                        ),
                    }
                }
                Err(e) => {
                    error!(source = %self.name, error = %e, "failed to open change feed subscription");
                }
            }

            self.state.set(SourceState::Sleeping);
            if !sleep_or_cancel(&cancel, self.options.reconnect_backoff).await {
                break;
            }
        }

        self.state.set(SourceState::Stopped);
        info!(source = %self.name, "streaming source stopped");
    }
}

impl ChangeSource for StreamingSource {
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
