// src/tracker/state.rs

//! Per-event claim state held by the tracker.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::EventId;

/// Phase of a tracked event (internal).
///
/// Collapsing "processing" and "processed" into one enum in one map is what
/// makes "member of at most one phase" hold structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Claimed; a workflow invocation is in flight.
    Processing,
    /// Workflow finished (or was abandoned) at `completed_at`.
    Processed {
        completed_at: DateTime<Utc>,
        success: bool,
    },
}

/// Public, read-only view of one event's tracked state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    pub id: EventId,
    pub phase: EventPhase,
    /// Set once the event reaches `Processed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set once the event reaches `Processed`.
    pub success: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    Processing,
    Processed,
}

impl EventState {
    pub(crate) fn from_phase(id: &EventId, phase: Phase) -> Self {
        match phase {
            Phase::Processing => Self {
                id: id.clone(),
                phase: EventPhase::Processing,
                completed_at: None,
                success: None,
            },
            Phase::Processed {
                completed_at,
                success,
            } => Self {
                id: id.clone(),
                phase: EventPhase::Processed,
                completed_at: Some(completed_at),
                success: Some(success),
            },
        }
    }
}

/// Point-in-time counters, for logging and `tracewatch trigger` output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub processing: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Retention policy for processed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Processed entries older than this are evicted.
    pub retention: Duration,
    /// Upper bound on processed entries kept after age-based eviction.
    pub capacity: usize,
}

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_CAPACITY: usize = 1000;

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            capacity: DEFAULT_CAPACITY,
        }
    }
}
