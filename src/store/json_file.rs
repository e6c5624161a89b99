// src/store/json_file.rs

//! File-backed store: a single JSON array of trace events.
//!
//! This is the "local storage" layout (`local_storage/trace_events.json`)
//! used when no database server is available. Writes go through a temp file
//! plus rename so readers (and the file watcher) never see a torn document.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::errors::{Result, TracewatchError};
use crate::store::{ChangeFeed, ChangeSubscription, EventStore, TraceEvent};
use crate::types::{BoxFuture, EventId};

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the file. Existing documents are kept as stored.
    pub async fn insert(&self, event: TraceEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut docs = load_documents(&self.path).await?;
        info!(event_id = %event.id, path = ?self.path, "inserting event into file store");
        docs.push(serde_json::to_value(&event)?);
        save_documents(&self.path, &docs).await
    }

    /// Every readable event in the file. Unreadable documents are skipped.
    pub async fn all_events(&self) -> Result<Vec<TraceEvent>> {
        load_events(&self.path).await
    }
}

/// Raw documents in file order. A missing or empty file reads as empty.
async fn load_documents(path: &Path) -> Result<Vec<Value>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(&contents)? {
        Value::Array(docs) => Ok(docs),
        other => Err(TracewatchError::StoreError(format!(
            "{} must hold a JSON array of events, found {}",
            path.display(),
            json_kind(&other)
        ))),
    }
}

/// Decode each document on its own; one malformed record must not hide
/// the rest of the store.
async fn load_events(path: &Path) -> Result<Vec<TraceEvent>> {
    let docs = load_documents(path).await?;
    let mut events = Vec::with_capacity(docs.len());
    for (index, doc) in docs.into_iter().enumerate() {
        let id = document_id(&doc).map(str::to_string);
        match serde_json::from_value::<TraceEvent>(doc) {
            Ok(event) => events.push(event),
            Err(e) => warn!(
                path = ?path,
                index,
                event_id = id.as_deref().unwrap_or("<none>"),
                error = %e,
                "skipping unreadable document in file store"
            ),
        }
    }
    Ok(events)
}

async fn save_documents(path: &Path, docs: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let body = serde_json::to_vec_pretty(docs)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn document_id(doc: &Value) -> Option<&str> {
    doc.get("_id").or_else(|| doc.get("id")).and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl EventStore for JsonFileStore {
    fn events_created_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<TraceEvent>>> {
        Box::pin(async move {
            let events = load_events(&self.path).await?;
            Ok(events
                .into_iter()
                .filter(|e| e.created_within(after, until))
                .collect())
        })
    }

    fn get_event<'a>(&'a self, id: &'a EventId) -> BoxFuture<'a, Result<Option<TraceEvent>>> {
        Box::pin(async move {
            let events = load_events(&self.path).await?;
            Ok(events.into_iter().find(|e| &e.id == id))
        })
    }

    fn set_result<'a>(&'a self, id: &'a EventId, result: Value) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut docs = load_documents(&self.path).await?;

            let Some(doc) = docs
                .iter_mut()
                .find(|d| document_id(d) == Some(id.as_str()))
                .and_then(Value::as_object_mut)
            else {
                warn!(event_id = %id, path = ?self.path, "event not found for result update");
                return Ok(false);
            };

            // Only this field of this document changes; keep whichever key
            // the document already uses.
            let key = if doc.contains_key("result") && !doc.contains_key("risk_assessment") {
                "result"
            } else {
                "risk_assessment"
            };
            doc.insert(key.to_string(), result);

            save_documents(&self.path, &docs).await?;
            debug!(event_id = %id, "result written to file store");
            Ok(true)
        })
    }
}

impl ChangeFeed for JsonFileStore {
    fn subscribe(&self) -> BoxFuture<'_, Result<Box<dyn ChangeSubscription>>> {
        Box::pin(async move {
            let sub = FileSubscription::open(self.path.clone()).await?;
            Ok(Box::new(sub) as Box<dyn ChangeSubscription>)
        })
    }
}

/// Watches the store file and reports ids that were not present when the
/// subscription was opened.
struct FileSubscription {
    path: PathBuf,
    seen: HashSet<EventId>,
    pending: VecDeque<EventId>,
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watcher: Option<RecommendedWatcher>,
}

impl FileSubscription {
    async fn open(path: PathBuf) -> Result<Self> {
        // Watch the directory: saves replace the file by rename, which would
        // orphan a watch on the file itself.
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Receiver gone means the subscription was closed.
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let seen = load_events(&path)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect::<HashSet<_>>();

        info!(path = ?path, known = seen.len(), "file store subscription opened");

        Ok(Self {
            path,
            seen,
            pending: VecDeque::new(),
            rx,
            watcher: Some(watcher),
        })
    }

    fn concerns_store_file(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        let Some(name) = self.path.file_name() else {
            return false;
        };
        event.paths.iter().any(|p| p.file_name() == Some(name))
    }

    async fn collect_new_ids(&mut self) {
        let events = match load_events(&self.path).await {
            Ok(events) => events,
            Err(e) => {
                // Next filesystem event triggers another reload.
                debug!(error = %e, path = ?self.path, "store file unreadable; waiting for next change");
                return;
            }
        };

        let mut fresh: Vec<TraceEvent> = events
            .into_iter()
            .filter(|e| !self.seen.contains(&e.id))
            .collect();
        fresh.sort_by_key(|e| e.created_at);

        for event in fresh {
            self.seen.insert(event.id.clone());
            self.pending.push_back(event.id);
        }
    }
}

impl ChangeSubscription for FileSubscription {
    fn next_created(&mut self) -> BoxFuture<'_, Result<Option<EventId>>> {
        Box::pin(async move {
            loop {
                if let Some(id) = self.pending.pop_front() {
                    return Ok(Some(id));
                }

                match self.rx.recv().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(TracewatchError::WatchError(e)),
                    Some(Ok(event)) => {
                        if self.concerns_store_file(&event) {
                            self.collect_new_ids().await;
                        }
                    }
                }
            }
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if let Some(mut watcher) = self.watcher.take() {
                let dir = self.path.parent().map(Path::to_path_buf);
                if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
                    if let Err(e) = watcher.unwatch(&dir) {
                        debug!(error = %e, "unwatch failed while closing subscription");
                    }
                }
            }
            debug!(path = ?self.path, "file store subscription closed");
            Ok(())
        })
    }
}
