//! Query cache storage.
//!
//! One entry per distinct `QueryKey`, created lazily on first access and kept
//! for the lifetime of the session. Entries are never evicted automatically;
//! `invalidate` is the only way to force a refetch.
//!
//! The cache is shared through `Rc` by every view of a session and lives on a
//! single thread. Each operation borrows the entry map only for its own
//! duration, so no mutation interleaves with another.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::FetchError;

use super::events::{EventBus, EventKind, Subscription};
use super::keys::QueryKey;

/// Per-key request counter.
///
/// Incremented each time a request is scheduled for a key; a response is
/// applied only while its token is still the key's current one.
pub type RequestToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// The cache's record for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: QueryKey,
    pub status: QueryStatus,
    /// Last successful data; kept while a refetch is loading.
    pub data: Option<V>,
    pub error: Option<FetchError>,
    /// When `data` was last written by a successful request.
    pub fetched_at: Option<Instant>,
    /// Token of the most recently scheduled request.
    pub request_id: RequestToken,
}

impl<V> CacheEntry<V> {
    fn idle(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            request_id: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

/// Partial update merged into an entry by [`QueryCache::set`].
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone)]
pub struct EntryPatch<V> {
    pub status: Option<QueryStatus>,
    pub data: Option<V>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<FetchError>>,
    pub fetched_at: Option<Instant>,
}

impl<V> Default for EntryPatch<V> {
    fn default() -> Self {
        Self {
            status: None,
            data: None,
            error: None,
            fetched_at: None,
        }
    }
}

impl<V> EntryPatch<V> {
    pub fn status(status: QueryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: V) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: FetchError) -> Self {
        self.error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn fetched_at(mut self, at: Instant) -> Self {
        self.fetched_at = Some(at);
        self
    }
}

/// Session-scoped query cache.
pub struct QueryCache<V> {
    entries: RefCell<HashMap<QueryKey, CacheEntry<V>>>,
    events: EventBus,
}

impl<V: Clone> QueryCache<V> {
    pub fn new() -> Self {
        Self::with_events(EventBus::new())
    }

    pub fn with_events(events: EventBus) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            events,
        }
    }

    /// Read the entry for `key`, creating an idle one if absent.
    pub fn get(&self, key: &QueryKey) -> CacheEntry<V> {
        self.entries
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(|| {
                trace!(key = %key, "Cache entry created");
                CacheEntry::idle(key.clone())
            })
            .clone()
    }

    /// Read the entry for `key` without creating it.
    pub fn peek(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        self.entries.borrow().get(key).cloned()
    }

    /// Merge `patch` into the entry for `key`.
    ///
    /// This is the raw write primitive; request results go through
    /// [`QueryCache::resolve`], which enforces the token check.
    pub fn set(&self, key: &QueryKey, patch: EntryPatch<V>) {
        {
            let mut entries = self.entries.borrow_mut();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::idle(key.clone()));
            if let Some(status) = patch.status {
                entry.status = status;
            }
            if let Some(data) = patch.data {
                entry.data = Some(data);
            }
            if let Some(error) = patch.error {
                entry.error = error;
            }
            if let Some(at) = patch.fetched_at {
                entry.fetched_at = Some(at);
            }
        }
        trace!(key = %key, "Cache entry patched");
        self.events.publish(key, EventKind::Patched);
    }

    /// Reset the entry for `key` to idle so the next access refetches.
    ///
    /// Any response still in flight for the key is superseded. Last known
    /// data is kept so views can keep showing it while the refetch loads.
    /// Invalidating a key that has no entry does nothing and returns `false`.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let invalidated = match self.entries.borrow_mut().get_mut(key) {
            Some(entry) => {
                entry.request_id += 1;
                entry.status = QueryStatus::Idle;
                entry.error = None;
                entry.fetched_at = None;
                true
            }
            None => false,
        };

        if invalidated {
            debug!(key = %key, "Cache entry invalidated");
            self.events.publish(key, EventKind::Invalidated);
        }
        invalidated
    }

    /// Whether `entry` must be refetched under a freshness window of `stale_after`.
    pub fn is_stale(entry: &CacheEntry<V>, stale_after: Duration) -> bool {
        Self::is_stale_at(entry, stale_after, Instant::now())
    }

    pub fn is_stale_at(entry: &CacheEntry<V>, stale_after: Duration, now: Instant) -> bool {
        match entry.status {
            QueryStatus::Idle | QueryStatus::Error => true,
            QueryStatus::Loading | QueryStatus::Success => match entry.fetched_at {
                Some(at) => now.saturating_duration_since(at) > stale_after,
                None => true,
            },
        }
    }

    /// Schedule a new request for `key`: bump its token and mark it loading.
    ///
    /// Existing data stays readable while the request is in flight.
    pub fn begin_request(&self, key: &QueryKey) -> RequestToken {
        let token = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::idle(key.clone()));
            entry.request_id += 1;
            entry.status = QueryStatus::Loading;
            entry.error = None;
            entry.request_id
        };

        self.events.publish(key, EventKind::Loading { token });
        token
    }

    /// Token of the most recent request for `key`, if the key has an entry.
    pub fn current_token(&self, key: &QueryKey) -> Option<RequestToken> {
        self.entries.borrow().get(key).map(|entry| entry.request_id)
    }

    /// Apply the result of request `token` for `key`.
    ///
    /// Returns `false`, leaving the entry untouched, when the token has been
    /// superseded by a newer request or an invalidation.
    pub fn resolve(
        &self,
        key: &QueryKey,
        token: RequestToken,
        result: Result<V, FetchError>,
    ) -> bool {
        let kind = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            if entry.request_id != token {
                return false;
            }

            match result {
                Ok(data) => {
                    entry.status = QueryStatus::Success;
                    entry.data = Some(data);
                    entry.error = None;
                    entry.fetched_at = Some(Instant::now());
                    EventKind::Resolved { token }
                }
                Err(error) => {
                    entry.status = QueryStatus::Error;
                    entry.error = Some(error);
                    EventKind::Failed { token }
                }
            }
        };

        self.events.publish(key, kind);
        true
    }

    /// Store an already-known value as a successful result without ever
    /// entering the loading state.
    pub fn prime(&self, key: &QueryKey, data: V) -> RequestToken {
        let token = {
            let mut entries = self.entries.borrow_mut();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::idle(key.clone()));
            entry.request_id += 1;
            entry.status = QueryStatus::Success;
            entry.data = Some(data);
            entry.error = None;
            entry.fetched_at = Some(Instant::now());
            entry.request_id
        };

        debug!(key = %key, token, "Cache entry primed");
        self.events.publish(key, EventKind::Resolved { token });
        token
    }

    /// Announce that a view switched to `key`.
    pub fn notify_activated(&self, key: &QueryKey) {
        self.events.publish(key, EventKind::Activated);
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
