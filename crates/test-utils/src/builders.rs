#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracewatch::store::TraceEvent;
use tracewatch::types::EventId;

/// Fixed test epoch plus `secs` seconds.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid test timestamp")
}

/// Builder for `TraceEvent` to simplify test setup.
pub struct TraceEventBuilder {
    event: TraceEvent,
}

impl TraceEventBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            event: TraceEvent::new(EventId::new(id), ts(0)),
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.event.created_at = at;
        self
    }

    /// Shorthand for `created_at(ts(secs))`.
    pub fn at(self, secs: i64) -> Self {
        self.created_at(ts(secs))
    }

    pub fn batch(mut self, batch_id: &str) -> Self {
        self.event.batch_id = batch_id.to_string();
        self
    }

    pub fn operation(mut self, op: &str) -> Self {
        self.event.operation_type = op.to_string();
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.event.payload.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> TraceEvent {
        self.event
    }
}
