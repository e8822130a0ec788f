//! Cache event system.
//!
//! The query cache publishes one event per key transition. UI collaborators
//! subscribe and re-read the views whose keys changed; the location chain
//! uses the same stream to re-evaluate its dependent stage.

use std::cell::Cell;

use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::QueryKey;
use super::store::RequestToken;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Monotonic epoch for ordering events.
///
/// Each event gets a unique, monotonically increasing epoch number within a
/// session.
pub type Epoch = u64;

/// Change notification for a single key.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for correlation in logs.
    pub id: Uuid,
    /// Monotonic epoch for ordering within this session.
    pub epoch: Epoch,
    /// The key whose entry changed.
    pub key: QueryKey,
    /// What happened to the entry.
    pub kind: EventKind,
    /// When the event was created.
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(key: QueryKey, kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            key,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Types of entry transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A view switched to this key; its entry may already be fresh.
    Activated,
    /// A request was scheduled and the entry is now loading.
    Loading { token: RequestToken },
    /// The current request succeeded.
    Resolved { token: RequestToken },
    /// The current request failed.
    Failed { token: RequestToken },
    /// The entry was reset to idle.
    Invalidated,
    /// Fields of the entry were overwritten directly.
    Patched,
}

/// Broadcast bus for cache events.
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
    epoch_counter: Cell<Epoch>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            epoch_counter: Cell::new(0),
        }
    }

    /// Get the next epoch number.
    pub fn next_epoch(&self) -> Epoch {
        let epoch = self.epoch_counter.get();
        self.epoch_counter.set(epoch + 1);
        epoch
    }

    /// Publish an event for `key`.
    ///
    /// Publishing without subscribers is not an error.
    pub fn publish(&self, key: &QueryKey, kind: EventKind) {
        let event = CacheEvent::new(key.clone(), kind, self.next_epoch());

        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            key = %event.key,
            "Cache event published"
        );

        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscriber's handle on the event stream.
pub struct Subscription {
    receiver: broadcast::Receiver<CacheEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    ///
    /// Events dropped because this subscriber fell behind are skipped.
    pub async fn next(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache subscriber lagged; events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait until an event for a key accepted by `relevant` arrives.
    ///
    /// Returns `false` once the bus is gone. A lagged receiver counts as a
    /// change because a skipped event may have been relevant.
    pub async fn changed(&mut self, relevant: impl Fn(&QueryKey) -> bool) -> bool {
        loop {
            match self.receiver.recv().await {
                Ok(event) if relevant(&event.key) => return true,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache subscriber lagged; forcing refresh");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }
}
