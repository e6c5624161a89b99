// src/store/model.rs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::EventId;

/// A stored trace event, as the detection core sees it.
///
/// Mirrors the stored document layout:
///
/// ```json
/// {
///   "_id": "66b1f0c2a1e4",
///   "batch_id": "P20230815001",
///   "timestamp": "2023-08-15T10:30:00",
///   "operation_type": "inbound",
///   "quantity": 50.5,
///   "risk_assessment": null
/// }
/// ```
///
/// Fields not named here are kept verbatim in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "_id", alias = "id")]
    pub id: EventId,

    #[serde(default)]
    pub batch_id: String,

    /// Creation time. Timestamps without an offset are read as UTC.
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub operation_type: String,

    /// Written back by the workflow; `None` until then. Stored as
    /// `risk_assessment`, the key other readers of the store look for.
    #[serde(default, rename = "risk_assessment", alias = "result")]
    pub result: Option<Value>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TraceEvent {
    pub fn new(id: impl Into<EventId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            batch_id: String::new(),
            created_at,
            operation_type: String::new(),
            result: None,
            payload: Map::new(),
        }
    }

    /// Whether `created_at` falls in the half-open window `(after, until]`.
    pub fn created_within(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.created_at > after && self.created_at <= until
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
}
