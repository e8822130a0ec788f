//! Character search view.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use portal_api_types::{Character, CharacterStatus, Paged};

use crate::cache::{
    CharacterParams, Debouncer, QueryKey, QueryView, Subscription, build_key,
};

use super::pagination::PagedQuery;
use super::session::QueryContext;

/// Filters a character search starts out with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterFilters {
    pub name: String,
    pub species: String,
    pub status: Option<CharacterStatus>,
    pub page: u32,
}

/// Character page filtered by name, status and species.
///
/// Name and species are free text and settle through a debouncer; the status
/// filter applies immediately. Any settled filter change returns the view to
/// the first page.
pub struct CharacterSearch {
    query: PagedQuery,
    name: Debouncer<String>,
    species: Debouncer<String>,
    status: Cell<Option<CharacterStatus>>,
}

impl CharacterSearch {
    /// Start from `filters` as already settled input, so the first request
    /// already carries them.
    pub(crate) fn new(context: Rc<QueryContext>, filters: CharacterFilters) -> Rc<Self> {
        let interval = context.config().search_debounce();
        let search = Rc::new(Self {
            query: PagedQuery::new(context),
            name: Debouncer::new("character_name", filters.name, interval),
            species: Debouncer::new("character_species", filters.species, interval),
            status: Cell::new(filters.status),
        });
        search.query.pagination().set(filters.page);

        for input in [&search.name, &search.species] {
            let weak: Weak<Self> = Rc::downgrade(&search);
            input.on_settle(move |_| {
                if let Some(search) = weak.upgrade() {
                    search.filters_changed();
                }
            });
        }

        search.sync();
        search
    }

    /// Raw name input; takes effect once typing pauses.
    pub fn set_name(&self, raw: impl Into<String>) {
        self.name.observe(raw.into());
    }

    /// Raw species input; takes effect once typing pauses.
    pub fn set_species(&self, raw: impl Into<String>) {
        self.species.observe(raw.into());
    }

    pub fn set_status(&self, status: Option<CharacterStatus>) {
        if self.status.replace(status) != status {
            self.filters_changed();
        }
    }

    pub fn set_page(&self, page: u32) {
        self.query.pagination().set(page);
        self.sync();
    }

    /// Settle pending text input now.
    pub fn flush(&self) {
        self.name.flush();
        self.species.flush();
    }

    pub fn page(&self) -> u32 {
        self.query.pagination().page()
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.query.pagination().total_pages()
    }

    /// Whether typed input is still waiting to settle.
    pub fn is_settling(&self) -> bool {
        self.name.is_pending() || self.species.is_pending()
    }

    pub fn current_key(&self) -> QueryKey {
        build_key(&CharacterParams {
            name: Some(self.name.settled()),
            status: self.status.get(),
            species: Some(self.species.settled()),
            page: self.page(),
        })
    }

    pub fn view(&self) -> QueryView<Rc<Paged<Character>>> {
        let view = self.query.view().and_then(|payload| payload.as_characters());
        if let (Some(page), false) = (view.data.as_ref(), view.is_stale) {
            self.query.pagination().set_total_pages(page.info.pages);
        }
        view
    }

    /// Refetch the current page regardless of freshness.
    pub fn refresh(&self) {
        self.query.refresh();
    }

    /// Whether a cache event for `key` can change this view.
    pub fn watches(&self, key: &QueryKey) -> bool {
        self.query.watches(key)
    }

    /// Wait until the view has settled data or an error to show.
    pub async fn ready(&self) -> QueryView<Rc<Paged<Character>>> {
        let mut events: Subscription = self.query.context().cache().subscribe();
        loop {
            let view = self.view();
            if !view.is_loading || !events.changed(|key| self.watches(key)).await {
                return view;
            }
        }
    }

    fn filters_changed(&self) {
        self.query.pagination().reset();
        self.sync();
    }

    fn sync(&self) {
        self.query.sync(self.current_key());
    }
}
