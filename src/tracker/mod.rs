// src/tracker/mod.rs

//! In-memory claim tracking.
//!
//! - [`registry`] holds [`EventTracker`], the lock-guarded claim map.
//! - [`state`] defines the per-event phase and the public read-only views.
//!
//! State is process-local and not persisted; two processes without a shared
//! store of claims will both dispatch the same event.

pub mod registry;
pub mod state;

pub use registry::EventTracker;
pub use state::{EventPhase, EventState, TrackerOptions, TrackerStats};
