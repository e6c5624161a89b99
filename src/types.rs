use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Boxed future returned by the collaborator traits (store, feed, workflow,
/// change source) so they stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque identity of a stored trace event.
///
/// Stores hand out whatever string form their native key has (for Mongo,
/// the ObjectId hex string); nothing here parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which change sources the supervisor should run.
///
/// - `Polling`: windowed queries against the store (default; works on any
///   store, including single-node deployments without a change feed).
/// - `Streaming`: subscribe to the store's change feed.
/// - `Both`: run both loops. They share one tracker, so an event seen by
///   both is still dispatched once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Polling,
    Streaming,
    Both,
}

impl Default for DetectionMode {
    fn default() -> Self {
        DetectionMode::Polling
    }
}

impl DetectionMode {
    pub fn polling(self) -> bool {
        matches!(self, DetectionMode::Polling | DetectionMode::Both)
    }

    pub fn streaming(self) -> bool {
        matches!(self, DetectionMode::Streaming | DetectionMode::Both)
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "polling" | "poll" => Ok(DetectionMode::Polling),
            "streaming" | "stream" => Ok(DetectionMode::Streaming),
            "both" => Ok(DetectionMode::Both),
            other => Err(format!(
                "invalid detection mode: {other} (expected \"polling\", \"streaming\" or \"both\")"
            )),
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionMode::Polling => "polling",
            DetectionMode::Streaming => "streaming",
            DetectionMode::Both => "both",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("Polling".parse::<DetectionMode>(), Ok(DetectionMode::Polling));
        assert_eq!(" stream ".parse::<DetectionMode>(), Ok(DetectionMode::Streaming));
        assert_eq!("BOTH".parse::<DetectionMode>(), Ok(DetectionMode::Both));
        assert!("push".parse::<DetectionMode>().is_err());
    }

    #[test]
    fn both_enables_each_source() {
        assert!(DetectionMode::Both.polling());
        assert!(DetectionMode::Both.streaming());
        assert!(!DetectionMode::Polling.streaming());
        assert!(!DetectionMode::Streaming.polling());
    }
}
