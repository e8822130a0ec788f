//! Dependency evaluation for chained queries.
//!
//! A [`DependentStage`] follows one upstream cache entry. While the upstream
//! entry holds successful data, the stage derives its own key from that data
//! through a [`DependencyEdge`] and keeps it fresh. When the upstream leaves
//! success the stage goes inactive. A response for a key the stage has left
//! still lands in the shared cache, where other views and later revisits
//! reuse it, but the stage no longer reports it.

use std::rc::Rc;

use tracing::debug;

use crate::domain::FetchError;

use super::config::CacheConfig;
use super::keys::QueryKey;
use super::retention::{QueryView, StaleRetention};
use super::scheduler::{FetchFn, FetchScheduler};
use super::store::{CacheEntry, QueryCache, QueryStatus};

/// Downstream target computed from upstream data.
#[derive(Debug, Clone, PartialEq)]
pub enum Edge<V> {
    /// Fetch `QueryKey` through the scheduler.
    Fetch(QueryKey),
    /// The result is already known; store it without a request.
    Resolved(QueryKey, V),
}

/// Maps upstream data to the downstream target; `None` leaves the stage
/// inactive.
pub type DependencyEdge<V> = Box<dyn Fn(&V) -> Option<Edge<V>>>;

/// Where a stage stands relative to its upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum StageState {
    Unselected,
    UpstreamLoading,
    UpstreamError(FetchError),
    UpstreamReady,
}

impl StageState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::UpstreamReady)
    }
}

pub struct DependentStage<V> {
    scheduler: Rc<FetchScheduler<V>>,
    fetch: FetchFn<V>,
    edge: DependencyEdge<V>,
    config: CacheConfig,
    state: StageState,
    retention: StaleRetention<V>,
}

impl<V: Clone + 'static> DependentStage<V> {
    pub fn new(
        scheduler: Rc<FetchScheduler<V>>,
        fetch: FetchFn<V>,
        config: CacheConfig,
        edge: impl Fn(&V) -> Option<Edge<V>> + 'static,
    ) -> Self {
        Self {
            scheduler,
            fetch,
            edge: Box::new(edge),
            config,
            state: StageState::Unselected,
            retention: StaleRetention::new(),
        }
    }

    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// Key the stage currently follows, if active.
    pub fn active_key(&self) -> Option<&QueryKey> {
        self.retention.active()
    }

    /// Re-derive the stage from the upstream entry; `None` means no upstream
    /// key is selected.
    pub fn evaluate(&mut self, upstream: Option<&CacheEntry<V>>) -> &StageState {
        let next = match upstream {
            None => {
                self.deactivate();
                self.retention.clear();
                StageState::Unselected
            }
            Some(entry) => match (entry.status, entry.data.as_ref()) {
                (QueryStatus::Success, Some(data)) => match (self.edge)(data) {
                    Some(edge) => {
                        self.follow(edge);
                        StageState::UpstreamReady
                    }
                    None => {
                        self.deactivate();
                        StageState::Unselected
                    }
                },
                (QueryStatus::Error, _) => {
                    self.deactivate();
                    self.retention.clear();
                    StageState::UpstreamError(
                        entry
                            .error
                            .clone()
                            .unwrap_or_else(|| FetchError::transport("upstream request failed")),
                    )
                }
                _ => {
                    self.deactivate();
                    StageState::UpstreamLoading
                }
            },
        };

        if next != self.state {
            debug!(from = ?self.state, to = ?next, "Dependent stage transition");
            self.state = next;
        }
        &self.state
    }

    /// Data view of the stage, with stale retention applied.
    ///
    /// While the upstream is loading the view reports `is_loading`, even
    /// though the stage itself follows no key.
    pub fn view(&mut self) -> QueryView<V> {
        let cache = Rc::clone(self.scheduler.cache());
        let mut view = self.retention.view(&cache);
        if self.state == StageState::UpstreamLoading {
            view.is_loading = true;
        }
        view
    }

    /// Force a refetch of the active key.
    pub fn refresh(&self) {
        if let Some(key) = self.retention.active() {
            let fetch = Rc::clone(&self.fetch);
            drop(self.scheduler.refetch(key, move |key| fetch(key)));
        }
    }

    fn follow(&mut self, edge: Edge<V>) {
        let cache = Rc::clone(self.scheduler.cache());
        match edge {
            Edge::Fetch(key) => {
                let switched = self.activate(&key);
                let idle = cache
                    .peek(&key)
                    .is_none_or(|entry| entry.status == QueryStatus::Idle);
                if switched || idle {
                    let fetch = Rc::clone(&self.fetch);
                    let stale_after = self.config.stale_after(&key);
                    drop(
                        self.scheduler
                            .ensure_fresh(&key, move |key| fetch(key), stale_after),
                    );
                }
            }
            Edge::Resolved(key, data) => {
                self.activate(&key);
                let stale_after = self.config.stale_after(&key);
                let fresh = cache.peek(&key).is_some_and(|entry| {
                    entry.is_success() && !QueryCache::is_stale(&entry, stale_after)
                });
                if !fresh {
                    debug!(key = %key, "Dependent stage short-circuited");
                    cache.prime(&key, data);
                }
            }
        }
    }

    fn activate(&mut self, key: &QueryKey) -> bool {
        let cache = Rc::clone(self.scheduler.cache());
        if !self.retention.activate(Some(key.clone()), &cache) {
            return false;
        }
        cache.notify_activated(key);
        true
    }

    fn deactivate(&mut self) {
        let cache = Rc::clone(self.scheduler.cache());
        self.retention.activate(None, &cache);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::task::LocalSet;

    use super::*;
    use crate::cache::scheduler::FetchResult;

    fn upstream(id: u64) -> QueryKey {
        QueryKey::Location { id }
    }

    fn downstream(id: u64) -> QueryKey {
        QueryKey::LocationSearch {
            name: crate::cache::keys::Filter::Term(format!("related-{id}")),
        }
    }

    /// Upstream data `"<id>"` points at `downstream(id)`; `"-"` has no
    /// related records.
    fn edge(data: &String) -> Option<Edge<String>> {
        match data.as_str() {
            "-" => Some(Edge::Resolved(downstream(0), "none".to_string())),
            id => id.parse().ok().map(|id| Edge::Fetch(downstream(id))),
        }
    }

    fn fixture(calls: &Rc<Cell<u32>>, delay: Duration) -> DependentStage<String> {
        let cache = Rc::new(QueryCache::new());
        let scheduler = Rc::new(FetchScheduler::new(cache));
        let calls = Rc::clone(calls);
        let fetch: FetchFn<String> = Rc::new(move |key: QueryKey| {
            calls.set(calls.get() + 1);
            async move {
                tokio::time::sleep(delay).await;
                FetchResult::Ok(format!("residents of {key}"))
            }
            .boxed_local()
        });
        DependentStage::new(scheduler, fetch, CacheConfig::default(), edge)
    }

    fn settle(stage: &DependentStage<String>, key: &QueryKey, data: &str) -> CacheEntry<String> {
        let cache = stage.scheduler.cache();
        let token = cache.begin_request(key);
        cache.resolve(key, token, Ok(data.to_string()));
        cache.get(key)
    }

    #[tokio::test(start_paused = true)]
    async fn walks_the_four_states() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let mut stage = fixture(&calls, Duration::ZERO);

                assert_eq!(stage.evaluate(None), &StageState::Unselected);

                let cache = Rc::clone(stage.scheduler.cache());
                cache.begin_request(&upstream(1));
                let loading = cache.get(&upstream(1));
                assert_eq!(stage.evaluate(Some(&loading)), &StageState::UpstreamLoading);
                assert_eq!(calls.get(), 0);

                let ready = settle(&stage, &upstream(1), "1");
                assert_eq!(stage.evaluate(Some(&ready)), &StageState::UpstreamReady);
                assert_eq!(stage.active_key(), Some(&downstream(1)));
                tokio::task::yield_now().await;
                assert_eq!(calls.get(), 1);

                let token = cache.begin_request(&upstream(2));
                cache.resolve(&upstream(2), token, Err(FetchError::response(404, "Location not found")));
                let failed = cache.get(&upstream(2));
                assert!(matches!(
                    stage.evaluate(Some(&failed)),
                    StageState::UpstreamError(_)
                ));
                assert_eq!(stage.active_key(), None);
                assert_eq!(calls.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_relation_short_circuits_without_fetching() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let mut stage = fixture(&calls, Duration::ZERO);
                let mut events = stage.scheduler.cache().subscribe();

                let ready = settle(&stage, &upstream(1), "-");
                stage.evaluate(Some(&ready));

                tokio::task::yield_now().await;
                assert_eq!(calls.get(), 0);
                assert_eq!(stage.view(), QueryView::fresh("none".to_string()));

                let mut saw_loading = false;
                while let Ok(Some(event)) =
                    tokio::time::timeout(Duration::ZERO, events.next()).await
                {
                    if event.key == downstream(0) {
                        saw_loading |= matches!(event.kind, crate::cache::EventKind::Loading { .. });
                    }
                }
                assert!(!saw_loading);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_change_ignores_the_pending_response() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let mut stage = fixture(&calls, Duration::from_millis(200));
                let cache = Rc::clone(stage.scheduler.cache());

                let a = settle(&stage, &upstream(1), "1");
                stage.evaluate(Some(&a));
                tokio::time::sleep(Duration::from_millis(50)).await;

                let b = settle(&stage, &upstream(2), "2");
                stage.evaluate(Some(&b));
                tokio::time::sleep(Duration::from_millis(500)).await;

                // The earlier response still lands for other readers of the key.
                let left = cache.get(&downstream(1));
                assert_eq!(left.status, QueryStatus::Success);
                assert_eq!(left.data, Some(format!("residents of {}", downstream(1))));
                assert_eq!(stage.active_key(), Some(&downstream(2)));
                assert_eq!(
                    stage.view(),
                    QueryView::fresh(format!("residents of {}", downstream(2)))
                );
                assert_eq!(calls.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn previous_downstream_data_is_retained_across_selection() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let mut stage = fixture(&calls, Duration::from_millis(100));
                let cache = Rc::clone(stage.scheduler.cache());

                let a = settle(&stage, &upstream(1), "1");
                stage.evaluate(Some(&a));
                tokio::time::sleep(Duration::from_millis(150)).await;
                let first = stage.view();
                assert!(!first.is_stale);

                cache.begin_request(&upstream(2));
                stage.evaluate(Some(&cache.get(&upstream(2))));
                let between = stage.view();
                assert_eq!(between.data, first.data);
                assert!(between.is_stale);
                assert!(between.is_loading);

                let b = settle(&stage, &upstream(2), "2");
                stage.evaluate(Some(&b));
                let loading = stage.view();
                assert_eq!(loading.data, first.data);
                assert!(loading.is_stale && loading.is_loading);

                tokio::time::sleep(Duration::from_millis(150)).await;
                let second = stage.view();
                assert!(!second.is_stale);
                assert_ne!(second.data, first.data);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unread_downstream_data_is_retained_while_the_upstream_loads() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let mut stage = fixture(&calls, Duration::from_millis(100));
                let cache = Rc::clone(stage.scheduler.cache());

                let a = settle(&stage, &upstream(1), "1");
                stage.evaluate(Some(&a));
                tokio::time::sleep(Duration::from_millis(150)).await;

                cache.begin_request(&upstream(2));
                stage.evaluate(Some(&cache.get(&upstream(2))));
                let pending = stage.view();
                assert_eq!(
                    pending.data,
                    Some(format!("residents of {}", downstream(1)))
                );
                assert!(pending.is_stale && pending.is_loading);
            })
            .await;
    }
}
