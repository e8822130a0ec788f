//! Stale retention policy.
//!
//! Decides what a view shows while its active key has no fresh data: the
//! same key's previous data, else the last successful data of any earlier
//! key of the view, marked stale. Errors are never masked by retained data.

use crate::domain::FetchError;

use super::keys::QueryKey;
use super::store::{QueryCache, QueryStatus};

/// What a UI collaborator renders for one query slot.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView<V> {
    pub data: Option<V>,
    pub is_loading: bool,
    /// `data` belongs to an earlier request than the one the view asks for.
    pub is_stale: bool,
    pub error: Option<FetchError>,
}

impl<V> QueryView<V> {
    /// Nothing to show and nothing requested.
    pub fn idle() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_stale: false,
            error: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::idle()
        }
    }

    pub fn fresh(data: V) -> Self {
        Self {
            data: Some(data),
            ..Self::idle()
        }
    }

    pub fn stale(data: V, is_loading: bool) -> Self {
        Self {
            data: Some(data),
            is_loading,
            is_stale: true,
            error: None,
        }
    }

    pub fn failed(error: FetchError) -> Self {
        Self {
            error: Some(error),
            ..Self::idle()
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> QueryView<U> {
        QueryView {
            data: self.data.map(f),
            is_loading: self.is_loading,
            is_stale: self.is_stale,
            error: self.error,
        }
    }

    /// Project the data through a fallible accessor.
    ///
    /// Data the accessor rejects becomes a shape error.
    pub fn and_then<U>(self, f: impl FnOnce(V) -> Option<U>) -> QueryView<U> {
        match self.data.map(f) {
            Some(None) => QueryView::failed(FetchError::shape("payload of unexpected kind")),
            data => QueryView {
                data: data.flatten(),
                is_loading: self.is_loading,
                is_stale: self.is_stale,
                error: self.error,
            },
        }
    }
}

/// Per-view memory of the active key and the last successful data.
#[derive(Debug, Clone)]
pub struct StaleRetention<V> {
    active: Option<QueryKey>,
    last_success: Option<(QueryKey, V)>,
}

impl<V> Default for StaleRetention<V> {
    fn default() -> Self {
        Self {
            active: None,
            last_success: None,
        }
    }
}

impl<V: Clone> StaleRetention<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the view to `key`; `None` makes the view inactive.
    ///
    /// Data the outgoing key holds in `cache` is retained, whether or not
    /// the view was read since it arrived. Returns whether the active key
    /// changed.
    pub fn activate(&mut self, key: Option<QueryKey>, cache: &QueryCache<V>) -> bool {
        if self.active == key {
            return false;
        }
        if let Some(previous) = self.active.take() {
            if let Some(data) = cache.peek(&previous).and_then(|entry| entry.data) {
                self.last_success = Some((previous, data));
            }
        }
        self.active = key;
        true
    }

    pub fn active(&self) -> Option<&QueryKey> {
        self.active.as_ref()
    }

    /// Forget retained data, e.g. after an upstream failure.
    pub fn clear(&mut self) {
        self.last_success = None;
    }

    pub fn retained(&self) -> Option<&V> {
        self.last_success.as_ref().map(|(_, data)| data)
    }

    /// Resolve the view for the active key against `cache`.
    pub fn view(&mut self, cache: &QueryCache<V>) -> QueryView<V> {
        let Some(key) = self.active.clone() else {
            return match self.retained() {
                Some(data) => QueryView::stale(data.clone(), false),
                None => QueryView::idle(),
            };
        };

        let Some(entry) = cache.peek(&key) else {
            return self.fallback(None, true);
        };

        match entry.status {
            QueryStatus::Success => match entry.data {
                Some(data) => {
                    self.last_success = Some((key, data.clone()));
                    QueryView::fresh(data)
                }
                None => self.fallback(None, false),
            },
            QueryStatus::Error => QueryView::failed(
                entry
                    .error
                    .unwrap_or_else(|| FetchError::transport("request failed")),
            ),
            QueryStatus::Loading => self.fallback(entry.data, true),
            QueryStatus::Idle => self.fallback(entry.data, true),
        }
    }

    fn fallback(&self, same_key: Option<V>, is_loading: bool) -> QueryView<V> {
        match same_key.or_else(|| self.retained().cloned()) {
            Some(data) => QueryView::stale(data, is_loading),
            None if is_loading => QueryView::loading(),
            None => QueryView::idle(),
        }
    }
}
