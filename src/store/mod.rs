// src/store/mod.rs

//! Persistent store collaborator.
//!
//! The detection core only needs two things from a store:
//!
//! - [`EventStore`]: a time-windowed read ("records created in `(t0, t1]`"),
//!   a point lookup, and a point write of the result field.
//! - [`ChangeFeed`] (optional): a push subscription yielding ids of newly
//!   created records.
//!
//! Two adapters ship with the crate:
//!
//! - [`memory::MemoryStore`] keeps events in memory and feeds subscribers
//!   from a broadcast channel. Used in tests and when embedding.
//! - [`json_file::JsonFileStore`] keeps events in a JSON array on disk and
//!   implements the feed by watching that file.

pub mod json_file;
pub mod memory;
pub mod model;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::Result;
use crate::types::{BoxFuture, EventId};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use model::TraceEvent;

/// Read/write access to stored trace events.
pub trait EventStore: Send + Sync {
    /// Events whose creation timestamp lies in `(after, until]`.
    fn events_created_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TraceEvent>>>;

    fn get_event<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<Option<TraceEvent>>>;

    /// Set the result field of `id`. Returns `false` if the event does not
    /// exist.
    fn set_result<'a>(&'a self, id: &'a EventId, result: Value) -> BoxFuture<'a, Result<bool>>;
}

/// Push-based notification of newly created events.
pub trait ChangeFeed: Send + Sync {
    /// Open a new subscription. Only events created after the subscription
    /// is opened are reported.
    fn subscribe(&self) -> BoxFuture<'_, Result<Box<dyn ChangeSubscription>>>;
}

/// An open change-feed subscription.
pub trait ChangeSubscription: Send {
    /// Wait for the next newly created event.
    ///
    /// `Ok(None)` means the stream ended normally (server-side
    /// invalidation, source closed); the caller is expected to resubscribe.
    fn next_created(&mut self) -> BoxFuture<'_, Result<Option<EventId>>>;

    /// Release the subscription's resources.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}
