// src/tracker/registry.rs

//! The claim registry shared by every detection and trigger path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::tracker::state::{EventState, Phase, TrackerOptions, TrackerStats};
use crate::types::EventId;

/// Single source of truth, per process, for "has this event already been
/// claimed or completed".
///
/// Every operation takes the same lock. [`EventTracker::mark_as_processing`]
/// is one critical section (check and insert together), which is the whole
/// at-most-once guarantee: racing callers for the same id see exactly one
/// `true`.
///
/// Construct one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct EventTracker {
    events: Mutex<HashMap<EventId, Phase>>,
    options: TrackerOptions,
    clock: Arc<dyn Clock>,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new(TrackerOptions::default())
    }
}

impl EventTracker {
    pub fn new(options: TrackerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: TrackerOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            options,
            clock,
        }
    }

    pub fn options(&self) -> TrackerOptions {
        self.options
    }

    /// The map is plain data and every mutation leaves it consistent, so a
    /// poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<EventId, Phase>> {
        self.events.lock().unwrap_or_else(|poisoned| {
            warn!("event tracker lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_processing(&self, id: &EventId) -> bool {
        matches!(self.lock().get(id), Some(Phase::Processing))
    }

    pub fn has_processed(&self, id: &EventId) -> bool {
        matches!(self.lock().get(id), Some(Phase::Processed { .. }))
    }

    /// Claim `id` for processing.
    ///
    /// Returns `true` only if the id was neither processing nor processed;
    /// in that case it is now `Processing`.
    pub fn mark_as_processing(&self, id: &EventId) -> bool {
        let mut events = self.lock();
        if let Some(phase) = events.get(id) {
            debug!(
                event_id = %id,
                ?phase,
                "event already processing or processed; claim refused"
            );
            return false;
        }

        events.insert(id.clone(), Phase::Processing);
        info!(event_id = %id, "event marked as processing");
        true
    }

    /// Record the outcome for `id` and run eviction.
    ///
    /// Works whether or not `id` was claimed first.
    pub fn mark_as_processed(&self, id: &EventId, success: bool) {
        let now = self.clock.now();
        let mut events = self.lock();

        events.insert(
            id.clone(),
            Phase::Processed {
                completed_at: now,
                success,
            },
        );
        info!(event_id = %id, success, "event marked as processed");

        self.evict(&mut events, now);
    }

    /// Snapshot of one event's state, if tracked.
    pub fn state(&self, id: &EventId) -> Option<EventState> {
        self.lock()
            .get(id)
            .map(|phase| EventState::from_phase(id, *phase))
    }

    pub fn stats(&self) -> TrackerStats {
        let events = self.lock();
        let mut stats = TrackerStats::default();
        for phase in events.values() {
            match phase {
                Phase::Processing => stats.processing += 1,
                Phase::Processed { success, .. } => {
                    stats.processed += 1;
                    if *success {
                        stats.succeeded += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
            }
        }
        stats
    }

    /// Drop processed entries past retention, then trim the oldest processed
    /// entries down to capacity. In-flight claims are never evicted.
    fn evict(&self, events: &mut HashMap<EventId, Phase>, now: DateTime<Utc>) {
        let retention =
            Duration::from_std(self.options.retention).unwrap_or(Duration::MAX);
        let cutoff = now.checked_sub_signed(retention);

        if let Some(cutoff) = cutoff {
            let before = events.len();
            events.retain(|_, phase| match phase {
                Phase::Processing => true,
                Phase::Processed { completed_at, .. } => *completed_at >= cutoff,
            });
            let expired = before - events.len();
            if expired > 0 {
                debug!(expired, "evicted processed events past retention");
            }
        }

        let mut processed: Vec<(DateTime<Utc>, EventId)> = events
            .iter()
            .filter_map(|(id, phase)| match phase {
                Phase::Processed { completed_at, .. } => Some((*completed_at, id.clone())),
                Phase::Processing => None,
            })
            .collect();

        if processed.len() <= self.options.capacity {
            return;
        }

        processed.sort();
        let excess = processed.len() - self.options.capacity;
        for (_, id) in processed.into_iter().take(excess) {
            events.remove(&id);
        }
        debug!(evicted = excess, "evicted oldest processed events over capacity");
    }
}
