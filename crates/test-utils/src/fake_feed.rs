use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracewatch::errors::{Result, TracewatchError};
use tracewatch::store::{ChangeFeed, ChangeSubscription};
use tracewatch::types::{BoxFuture, EventId};

type Item = std::result::Result<EventId, String>;

/// A `ChangeFeed` driven by the test.
///
/// Each subscription gets its own channel. The test pushes ids to every
/// open subscription, ends or fails the streams, and can make `subscribe`
/// or `close` misbehave.
#[derive(Default)]
pub struct ScriptedFeed {
    senders: Mutex<Vec<mpsc::UnboundedSender<Item>>>,
    failing_subscribes: AtomicUsize,
    subscribe_calls: AtomicUsize,
    hang_on_close: AtomicBool,
    closed: Arc<AtomicUsize>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls to `subscribe` fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Make `close` never complete.
    pub fn hang_on_close(&self, hang: bool) {
        self.hang_on_close.store(hang, Ordering::SeqCst);
    }

    /// Deliver `id` to every open subscription. Returns how many got it.
    pub fn push(&self, id: &str) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.send(Ok(EventId::new(id))).is_ok())
            .count()
    }

    /// End every open stream normally.
    pub fn end_streams(&self) {
        self.senders.lock().unwrap().clear();
    }

    /// Fail every open stream with `message`.
    pub fn fail_streams(&self, message: &str) {
        let mut senders = self.senders.lock().unwrap();
        for tx in senders.drain(..) {
            let _ = tx.send(Err(message.to_string()));
        }
    }

    /// Subscriptions currently open.
    pub fn open_subscriptions(&self) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Subscriptions closed gracefully.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ChangeFeed for ScriptedFeed {
    fn subscribe(&self) -> BoxFuture<'_, Result<Box<dyn ChangeSubscription>>> {
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

            let failed = self
                .failing_subscribes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TracewatchError::StoreError(
                    "scripted subscribe failure".to_string(),
                ));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok(Box::new(ScriptedSubscription {
                rx,
                hang_on_close: self.hang_on_close.load(Ordering::SeqCst),
                closed: Arc::clone(&self.closed),
            }) as Box<dyn ChangeSubscription>)
        })
    }
}

struct ScriptedSubscription {
    rx: mpsc::UnboundedReceiver<Item>,
    hang_on_close: bool,
    closed: Arc<AtomicUsize>,
}

impl ChangeSubscription for ScriptedSubscription {
    fn next_created(&mut self) -> BoxFuture<'_, Result<Option<EventId>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(Ok(id)) => Ok(Some(id)),
                Some(Err(message)) => Err(TracewatchError::StoreError(message)),
                None => Ok(None),
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            if self.hang_on_close {
                std::future::pending::<()>().await;
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
