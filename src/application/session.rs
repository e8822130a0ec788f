//! Session wiring: one query cache and scheduler shared by every view.

use std::rc::Rc;

use tracing::info;

use crate::application::catalog::{CatalogService, payload_fetcher};
use crate::application::characters::{CharacterFilters, CharacterSearch};
use crate::application::episodes::{EpisodeFilters, EpisodeList};
use crate::application::locations::LocationExplorer;
use crate::cache::{
    CacheConfig, FetchFn, FetchHandle, FetchScheduler, FixedRetry, QueryCache, QueryKey,
    Subscription,
};
use crate::domain::Payload;

/// Everything a view needs to turn keys into fresh cache entries.
pub struct QueryContext {
    scheduler: Rc<FetchScheduler<Payload>>,
    fetch: FetchFn<Payload>,
    config: CacheConfig,
}

impl QueryContext {
    pub fn new(catalog: Rc<dyn CatalogService>, config: CacheConfig) -> Self {
        let cache = Rc::new(QueryCache::new());
        let mut scheduler = FetchScheduler::new(cache);
        if config.retries_enabled() {
            scheduler = scheduler.with_retry(FixedRetry {
                attempts: config.retry_attempts,
                delay: config.retry_delay(),
            });
        }

        Self {
            scheduler: Rc::new(scheduler),
            fetch: payload_fetcher(catalog),
            config,
        }
    }

    /// Keep `key` fresh under its family's staleness window.
    pub fn ensure(&self, key: &QueryKey) -> FetchHandle<Payload> {
        let fetch = Rc::clone(&self.fetch);
        self.scheduler
            .ensure_fresh(key, move |key| fetch(key), self.config.stale_after(key))
    }

    /// Invalidate `key` and fetch it again.
    pub fn refetch(&self, key: &QueryKey) -> FetchHandle<Payload> {
        let fetch = Rc::clone(&self.fetch);
        self.scheduler.refetch(key, move |key| fetch(key))
    }

    pub fn cache(&self) -> &Rc<QueryCache<Payload>> {
        self.scheduler.cache()
    }

    pub fn scheduler(&self) -> &Rc<FetchScheduler<Payload>> {
        &self.scheduler
    }

    pub fn fetch(&self) -> &FetchFn<Payload> {
        &self.fetch
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

/// A browsing session over one catalog.
///
/// Views created from the same session share its cache, so a page fetched by
/// one view is served to another without a second request. Views spawn local
/// tasks and must be created and driven inside a `tokio::task::LocalSet`.
pub struct Session {
    context: Rc<QueryContext>,
}

impl Session {
    pub fn new(catalog: Rc<dyn CatalogService>, config: CacheConfig) -> Self {
        info!(
            search_debounce_ms = config.search_debounce_ms,
            location_debounce_ms = config.location_debounce_ms,
            retry_attempts = config.retry_attempts,
            "Query session started"
        );
        Self {
            context: Rc::new(QueryContext::new(catalog, config)),
        }
    }

    pub fn context(&self) -> &Rc<QueryContext> {
        &self.context
    }

    pub fn cache(&self) -> &Rc<QueryCache<Payload>> {
        self.context.cache()
    }

    /// Stream of cache events for UI collaborators.
    pub fn subscribe(&self) -> Subscription {
        self.context.cache().subscribe()
    }

    pub fn character_search(&self) -> Rc<CharacterSearch> {
        self.character_search_with(CharacterFilters::default())
    }

    /// Character search whose first request already applies `filters`.
    pub fn character_search_with(&self, filters: CharacterFilters) -> Rc<CharacterSearch> {
        CharacterSearch::new(Rc::clone(&self.context), filters)
    }

    pub fn episode_list(&self) -> Rc<EpisodeList> {
        self.episode_list_with(EpisodeFilters::default())
    }

    pub fn episode_list_with(&self, filters: EpisodeFilters) -> Rc<EpisodeList> {
        EpisodeList::new(Rc::clone(&self.context), filters)
    }

    pub fn location_explorer(&self) -> Rc<LocationExplorer> {
        LocationExplorer::new(Rc::clone(&self.context))
    }
}
