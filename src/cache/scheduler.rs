//! Fetch scheduler.
//!
//! Turns "make sure this key is fresh" into at most one in-flight request per
//! key. Every request runs as a `spawn_local` task tagged with the key's
//! request token; its result is written to the cache only while that token is
//! still current, so a slow superseded response can never overwrite a newer
//! one. Dropping a [`FetchHandle`] does not stop the request.
//!
//! The scheduler must be driven from inside a `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::domain::FetchError;

use super::keys::QueryKey;
use super::store::{QueryCache, RequestToken};

pub type FetchResult<V> = Result<V, FetchError>;

/// Awaitable, cloneable view of one scheduled (or cached) request.
pub type FetchHandle<V> = Shared<LocalBoxFuture<'static, FetchOutcome<V>>>;

/// Type-erased fetch function, shared by every view of a session.
pub type FetchFn<V> = Rc<dyn Fn(QueryKey) -> LocalBoxFuture<'static, FetchResult<V>>>;

/// How a call to [`FetchScheduler::ensure_fresh`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<V> {
    /// Served from a fresh entry; no request was made.
    Cached(V),
    /// The request succeeded and its data was applied.
    Fetched(V),
    /// The request failed and the error was recorded on the entry.
    Failed(FetchError),
    /// A newer request or an invalidation superseded this one; its response
    /// was discarded.
    Superseded,
}

impl<V> FetchOutcome<V> {
    pub fn data(&self) -> Option<&V> {
        match self {
            Self::Cached(data) | Self::Fetched(data) => Some(data),
            Self::Failed(_) | Self::Superseded => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded)
    }
}

/// Decides whether a failed fetch is attempted again within the same token.
pub trait RetryHook {
    /// Delay before attempt `attempt + 1`, or `None` to give up.
    fn retry_after(&self, key: &QueryKey, attempt: u32, error: &FetchError) -> Option<Duration>;
}

/// Never retry; failures are recorded as they happen.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryHook for NoRetry {
    fn retry_after(&self, _: &QueryKey, _: u32, _: &FetchError) -> Option<Duration> {
        None
    }
}

/// Retry transport failures and server errors a fixed number of times.
///
/// Client errors (4xx) and shape errors are permanent and never retried.
#[derive(Debug, Clone, Copy)]
pub struct FixedRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryHook for FixedRetry {
    fn retry_after(&self, _: &QueryKey, attempt: u32, error: &FetchError) -> Option<Duration> {
        let transient = match error {
            FetchError::Transport { .. } => true,
            FetchError::Response { status, .. } => *status >= 500,
            FetchError::Shape { .. } => false,
        };
        (transient && attempt <= self.attempts).then_some(self.delay)
    }
}

struct InFlight<V> {
    token: RequestToken,
    handle: FetchHandle<V>,
}

pub struct FetchScheduler<V> {
    cache: Rc<QueryCache<V>>,
    in_flight: Rc<RefCell<HashMap<QueryKey, InFlight<V>>>>,
    retry: Rc<dyn RetryHook>,
}

impl<V: Clone + 'static> FetchScheduler<V> {
    pub fn new(cache: Rc<QueryCache<V>>) -> Self {
        Self {
            cache,
            in_flight: Rc::new(RefCell::new(HashMap::new())),
            retry: Rc::new(NoRetry),
        }
    }

    /// Attach a retry hook at the scheduler boundary.
    pub fn with_retry(mut self, hook: impl RetryHook + 'static) -> Self {
        self.retry = Rc::new(hook);
        self
    }

    pub fn cache(&self) -> &Rc<QueryCache<V>> {
        &self.cache
    }

    /// Make sure `key` holds data no older than `stale_after`.
    ///
    /// Fresh entries resolve immediately without calling `fetch`. A key that
    /// is already loading hands out the in-flight request instead of issuing
    /// a second one. Otherwise a new request is scheduled under a new token.
    pub fn ensure_fresh<F, Fut>(
        &self,
        key: &QueryKey,
        fetch: F,
        stale_after: Duration,
    ) -> FetchHandle<V>
    where
        F: Fn(QueryKey) -> Fut + 'static,
        Fut: Future<Output = FetchResult<V>> + 'static,
    {
        let entry = self.cache.get(key);

        if entry.is_success() && !QueryCache::is_stale(&entry, stale_after) {
            if let Some(data) = entry.data.clone() {
                counter!("portal_query_cache_hit_total", "family" => key.family()).increment(1);
                trace!(key = %key, "Cache hit");
                return future::ready(FetchOutcome::Cached(data))
                    .boxed_local()
                    .shared();
            }
        }

        if entry.is_loading() {
            if let Some(handle) = self.attach(key, entry.request_id) {
                counter!("portal_query_fetch_coalesced_total", "family" => key.family())
                    .increment(1);
                trace!(key = %key, token = entry.request_id, "Joined in-flight request");
                return handle;
            }
        }

        counter!("portal_query_cache_miss_total", "family" => key.family()).increment(1);
        self.schedule(key, fetch)
    }

    /// Invalidate `key` and fetch it again, superseding any request in flight.
    pub fn refetch<F, Fut>(&self, key: &QueryKey, fetch: F) -> FetchHandle<V>
    where
        F: Fn(QueryKey) -> Fut + 'static,
        Fut: Future<Output = FetchResult<V>> + 'static,
    {
        self.cache.invalidate(key);
        counter!("portal_query_cache_miss_total", "family" => key.family()).increment(1);
        self.schedule(key, fetch)
    }

    /// Whether a request for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        let current = self.cache.current_token(key);
        self.in_flight
            .borrow()
            .get(key)
            .is_some_and(|slot| Some(slot.token) == current)
    }

    fn attach(&self, key: &QueryKey, token: RequestToken) -> Option<FetchHandle<V>> {
        self.in_flight
            .borrow()
            .get(key)
            .filter(|slot| slot.token == token)
            .map(|slot| slot.handle.clone())
    }

    fn schedule<F, Fut>(&self, key: &QueryKey, fetch: F) -> FetchHandle<V>
    where
        F: Fn(QueryKey) -> Fut + 'static,
        Fut: Future<Output = FetchResult<V>> + 'static,
    {
        let token = self.cache.begin_request(key);
        debug!(key = %key, token, "Fetch scheduled");

        let task = run_request(
            Rc::clone(&self.cache),
            Rc::clone(&self.in_flight),
            Rc::clone(&self.retry),
            key.clone(),
            token,
            fetch,
        );
        let join = tokio::task::spawn_local(task);
        let handle = async move {
            join.await.unwrap_or_else(|err| {
                FetchOutcome::Failed(FetchError::transport(format!(
                    "fetch task ended unexpectedly: {err}"
                )))
            })
        }
        .boxed_local()
        .shared();

        self.in_flight.borrow_mut().insert(
            key.clone(),
            InFlight {
                token,
                handle: handle.clone(),
            },
        );
        handle
    }
}

async fn run_request<V, F, Fut>(
    cache: Rc<QueryCache<V>>,
    in_flight: Rc<RefCell<HashMap<QueryKey, InFlight<V>>>>,
    retry: Rc<dyn RetryHook>,
    key: QueryKey,
    token: RequestToken,
    fetch: F,
) -> FetchOutcome<V>
where
    V: Clone + 'static,
    F: Fn(QueryKey) -> Fut,
    Fut: Future<Output = FetchResult<V>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match fetch(key.clone()).await {
            Ok(data) => break Ok(data),
            Err(error) => {
                let current = cache.current_token(&key) == Some(token);
                match retry
                    .retry_after(&key, attempt, &error)
                    .filter(|_| current)
                {
                    Some(delay) => {
                        info!(
                            key = %key,
                            token,
                            attempt,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying failed fetch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break Err(error),
                }
            }
        }
    };
    histogram!("portal_query_fetch_ms", "family" => key.family())
        .record(started.elapsed().as_secs_f64() * 1000.0);

    let outcome = settle(&cache, &key, token, result);

    let mut slots = in_flight.borrow_mut();
    if slots.get(&key).is_some_and(|slot| slot.token == token) {
        slots.remove(&key);
    }
    outcome
}

fn settle<V: Clone>(
    cache: &QueryCache<V>,
    key: &QueryKey,
    token: RequestToken,
    result: FetchResult<V>,
) -> FetchOutcome<V> {
    match result {
        Ok(data) => {
            if cache.resolve(key, token, Ok(data.clone())) {
                debug!(key = %key, token, "Fetch applied");
                FetchOutcome::Fetched(data)
            } else {
                discarded(key, token);
                FetchOutcome::Superseded
            }
        }
        Err(error) => {
            if cache.resolve(key, token, Err(error.clone())) {
                counter!(
                    "portal_query_fetch_error_total",
                    "family" => key.family(),
                    "kind" => error.kind()
                )
                .increment(1);
                warn!(key = %key, token, error = %error, "Fetch failed");
                FetchOutcome::Failed(error)
            } else {
                discarded(key, token);
                FetchOutcome::Superseded
            }
        }
    }
}

fn discarded(key: &QueryKey, token: RequestToken) {
    counter!("portal_query_fetch_discarded_total", "family" => key.family()).increment(1);
    debug!(key = %key, token, "Discarded superseded response");
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tokio::task::LocalSet;

    use super::*;
    use crate::cache::store::QueryStatus;

    fn key(id: u64) -> QueryKey {
        QueryKey::Location { id }
    }

    fn scheduler() -> FetchScheduler<String> {
        FetchScheduler::new(Rc::new(QueryCache::new()))
    }

    /// A fetch function that answers `value` after `delay` and counts calls.
    fn delayed(
        calls: &Rc<Cell<u32>>,
        delay: Duration,
        value: &'static str,
    ) -> impl Fn(QueryKey) -> LocalBoxFuture<'static, FetchResult<String>> + 'static {
        let calls = Rc::clone(calls);
        move |_| {
            calls.set(calls.get() + 1);
            async move {
                tokio::time::sleep(delay).await;
                Ok(value.to_string())
            }
            .boxed_local()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_request() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));
                let window = Duration::from_secs(30);

                let first =
                    scheduler.ensure_fresh(&key(1), delayed(&calls, Duration::from_millis(50), "a"), window);
                let second =
                    scheduler.ensure_fresh(&key(1), delayed(&calls, Duration::from_millis(50), "b"), window);

                let (first, second) = tokio::join!(first, second);
                assert_eq!(calls.get(), 1);
                assert_eq!(first, FetchOutcome::Fetched("a".to_string()));
                assert_eq!(second, FetchOutcome::Fetched("a".to_string()));
                assert!(!scheduler.is_in_flight(&key(1)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_fetching() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));
                let window = Duration::from_secs(30);

                scheduler
                    .ensure_fresh(&key(1), delayed(&calls, Duration::ZERO, "a"), window)
                    .await;
                let outcome = scheduler
                    .ensure_fresh(&key(1), delayed(&calls, Duration::ZERO, "b"), window)
                    .await;

                assert_eq!(calls.get(), 1);
                assert_eq!(outcome, FetchOutcome::Cached("a".to_string()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_refetched() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));
                let window = Duration::from_millis(100);

                scheduler
                    .ensure_fresh(&key(1), delayed(&calls, Duration::ZERO, "a"), window)
                    .await;
                tokio::time::sleep(Duration::from_millis(150)).await;
                let outcome = scheduler
                    .ensure_fresh(&key(1), delayed(&calls, Duration::ZERO, "b"), window)
                    .await;

                assert_eq!(calls.get(), 2);
                assert_eq!(outcome, FetchOutcome::Fetched("b".to_string()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_request_wins_over_slower_response() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));
                let window = Duration::from_secs(30);

                let slow = scheduler.ensure_fresh(
                    &key(1),
                    delayed(&calls, Duration::from_millis(500), "token-1"),
                    window,
                );
                let fast =
                    scheduler.refetch(&key(1), delayed(&calls, Duration::from_millis(100), "token-2"));

                assert_eq!(fast.await, FetchOutcome::Fetched("token-2".to_string()));
                assert_eq!(slow.await, FetchOutcome::Superseded);

                let entry = scheduler.cache().get(&key(1));
                assert_eq!(entry.status, QueryStatus::Success);
                assert_eq!(entry.data.as_deref(), Some("token-2"));
                assert_eq!(calls.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_local_to_its_key() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));
                let window = Duration::from_secs(30);

                let failing = scheduler.ensure_fresh(
                    &key(1),
                    |_| async { Err(FetchError::response(500, "catalog unavailable")) },
                    window,
                );
                let healthy =
                    scheduler.ensure_fresh(&key(2), delayed(&calls, Duration::ZERO, "ok"), window);

                let (failing, healthy) = tokio::join!(failing, healthy);
                assert!(failing.error().is_some());
                assert_eq!(healthy, FetchOutcome::Fetched("ok".to_string()));

                let cache = scheduler.cache();
                assert_eq!(cache.get(&key(1)).status, QueryStatus::Error);
                assert_eq!(cache.get(&key(2)).status, QueryStatus::Success);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_still_completes() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler();
                let calls = Rc::new(Cell::new(0));

                drop(scheduler.ensure_fresh(
                    &key(1),
                    delayed(&calls, Duration::from_millis(10), "done"),
                    Duration::from_secs(30),
                ));
                tokio::time::sleep(Duration::from_millis(20)).await;

                assert_eq!(
                    scheduler.cache().get(&key(1)).data.as_deref(),
                    Some("done")
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn retry_hook_retries_transient_failures() {
        LocalSet::new()
            .run_until(async {
                let scheduler = scheduler().with_retry(FixedRetry {
                    attempts: 2,
                    delay: Duration::from_millis(10),
                });
                let calls = Rc::new(Cell::new(0));
                let counter = Rc::clone(&calls);

                let outcome = scheduler
                    .ensure_fresh(
                        &key(1),
                        move |_| {
                            counter.set(counter.get() + 1);
                            let attempt = counter.get();
                            async move {
                                if attempt < 3 {
                                    Err(FetchError::transport("connection reset"))
                                } else {
                                    Ok("third time".to_string())
                                }
                            }
                        },
                        Duration::from_secs(30),
                    )
                    .await;

                assert_eq!(calls.get(), 3);
                assert_eq!(outcome, FetchOutcome::Fetched("third time".to_string()));
            })
            .await;
    }

    #[test]
    fn fixed_retry_skips_permanent_errors() {
        let hook = FixedRetry {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let key = key(1);

        assert!(hook.retry_after(&key, 1, &FetchError::shape("bad json")).is_none());
        assert!(hook.retry_after(&key, 1, &FetchError::response(404, "missing")).is_none());
        assert!(hook.retry_after(&key, 1, &FetchError::response(503, "busy")).is_some());
        assert!(hook.retry_after(&key, 4, &FetchError::transport("reset")).is_none());
    }
}
