// src/store/memory.rs

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::errors::{Result, TracewatchError};
use crate::store::{ChangeFeed, ChangeSubscription, EventStore, TraceEvent};
use crate::types::{BoxFuture, EventId};

const FEED_CAPACITY: usize = 1024;

/// In-memory event store with a broadcast change feed.
///
/// Every [`MemoryStore::insert`] is published to all open subscriptions.
#[derive(Debug)]
pub struct MemoryStore {
    events: Mutex<Vec<TraceEvent>>,
    feed: broadcast::Sender<EventId>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            events: Mutex::new(Vec::new()),
            feed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an event and notify subscribers.
    pub fn insert(&self, event: TraceEvent) {
        let id = event.id.clone();
        self.lock().push(event);
        // No receivers is fine: nobody is subscribed right now.
        let _ = self.feed.send(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn result_of(&self, id: &EventId) -> Option<Value> {
        self.lock()
            .iter()
            .find(|e| &e.id == id)
            .and_then(|e| e.result.clone())
    }
}

impl EventStore for MemoryStore {
    fn events_created_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TraceEvent>>> {
        Box::pin(async move {
            let found: Vec<TraceEvent> = self
                .lock()
                .iter()
                .filter(|e| e.created_within(after, until))
                .cloned()
                .collect();
            Ok(found)
        })
    }

    fn get_event<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<Option<TraceEvent>>> {
        Box::pin(async move { Ok(self.lock().iter().find(|e| &e.id == id).cloned()) })
    }

    fn set_result<'a>(&'a self, id: &'a EventId, result: Value) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let mut events = self.lock();
            match events.iter_mut().find(|e| &e.id == id) {
                Some(event) => {
                    event.result = Some(result);
                    Ok(true)
                }
                None => {
                    warn!(event_id = %id, "event not found for result update");
                    Ok(false)
                }
            }
        })
    }
}

impl ChangeFeed for MemoryStore {
    fn subscribe(&self) -> BoxFuture<'_, Result<Box<dyn ChangeSubscription>>> {
        Box::pin(async move {
            let rx = self.feed.subscribe();
            debug!("memory store subscription opened");
            Ok(Box::new(MemorySubscription { rx }) as Box<dyn ChangeSubscription>)
        })
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<EventId>,
}

impl ChangeSubscription for MemorySubscription {
    fn next_created(&mut self) -> BoxFuture<'_, Result<Option<EventId>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Ok(id) => Ok(Some(id)),
                Err(broadcast::error::RecvError::Closed) => Ok(None),
                // Lost notifications cannot be replayed from here; fail the
                // subscription so the caller reconnects (polling covers gaps).
                Err(broadcast::error::RecvError::Lagged(missed)) => Err(
                    TracewatchError::StoreError(format!(
                        "change feed lagged; {missed} notifications dropped"
                    )),
                ),
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn window_query_honours_bounds() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store.insert(TraceEvent::new("at-t0", t0));
        store.insert(TraceEvent::new("mid", t0 + Duration::seconds(5)));
        store.insert(TraceEvent::new("at-t1", t0 + Duration::seconds(10)));
        store.insert(TraceEvent::new("late", t0 + Duration::seconds(11)));

        let found = store
            .events_created_between(t0, t0 + Duration::seconds(10))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "at-t1"]);
    }

    #[tokio::test]
    async fn subscription_sees_only_later_inserts() {
        let store = MemoryStore::new();
        store.insert(TraceEvent::new("before", Utc::now()));

        let mut sub = store.subscribe().await.unwrap();
        store.insert(TraceEvent::new("after", Utc::now()));

        assert_eq!(sub.next_created().await.unwrap(), Some(EventId::from("after")));
        sub.close().await.unwrap();
    }

    #[tokio::test]
    async fn set_result_reports_missing_events() {
        let store = MemoryStore::new();
        store.insert(TraceEvent::new("e1", Utc::now()));

        let id = EventId::from("e1");
        assert!(store.set_result(&id, serde_json::json!({"ok": true})).await.unwrap());
        assert!(!store
            .set_result(&EventId::from("nope"), Value::Null)
            .await
            .unwrap());
        assert_eq!(store.result_of(&id), Some(serde_json::json!({"ok": true})));
    }
}
