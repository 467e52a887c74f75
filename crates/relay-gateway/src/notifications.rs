//! In-process notification fan-out.
//!
//! The gateway transport (websocket, test harness, ...) publishes events into
//! a `NotificationHub`; every `Subscription` sees each event published after it
//! was created. Closing the hub ends all subscriptions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::NotificationStream;
use relay_types::{NotificationEvent, NotificationType};

const DEFAULT_CAPACITY: usize = 256;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Handle on a notification stream. Released exactly once, either by
/// `unsubscribe` or on drop.
pub struct Subscription {
    id: u64,
    rx: broadcast::Receiver<NotificationEvent>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    pub fn new(
        id: u64,
        rx: broadcast::Receiver<NotificationEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Wait for the next event. `None` once the stream is closed or this
    /// subscription was released.
    ///
    /// If the subscriber fell behind, a batch update without a hash is
    /// returned so the caller re-checks whatever it is waiting on.
    pub async fn next(&mut self) -> Option<NotificationEvent> {
        if !self.is_active() {
            return None;
        }
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscription = self.id, skipped, "notification subscriber lagged");
                Some(NotificationEvent {
                    kind: NotificationType::GatewayBatchUpdated,
                    batch_hash: None,
                })
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Broadcast hub for gateway notifications.
pub struct NotificationHub {
    tx: Mutex<Option<broadcast::Sender<NotificationEvent>>>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `event` to every live subscription. Returns how many received it.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        let tx = match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        match tx {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Forward events from `stream` until it ends or the hub is closed.
    pub async fn pump<S>(&self, stream: S)
    where
        S: Stream<Item = NotificationEvent>,
    {
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            if self.is_closed() {
                break;
            }
            self.publish(event);
        }
    }

    /// End every subscription; later subscriptions are born closed.
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            if guard.take().is_some() {
                debug!("notification hub closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStream for NotificationHub {
    fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = match self.tx.lock() {
            Ok(guard) => guard.as_ref().map(|tx| tx.subscribe()),
            Err(_) => None,
        };
        // A closed hub hands out a receiver whose sender is already gone.
        let rx = rx.unwrap_or_else(|| broadcast::channel(1).1);

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        Subscription::new(id, rx, move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
