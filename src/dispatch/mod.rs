// src/dispatch/mod.rs

//! Dispatch layer.
//!
//! - [`dispatcher`] claims an event through the tracker and runs its
//!   workflow in an independent task, recording the outcome on completion.
//! - [`trigger`] exposes the same protocol to manual callers, with an
//!   existence check against the store.

pub mod dispatcher;
pub mod trigger;

pub use dispatcher::{DispatchOutcome, Dispatcher, DrainReport};
pub use trigger::{ManualTrigger, TriggerOutcome};
