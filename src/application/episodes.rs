//! Episode list view.

use std::rc::{Rc, Weak};

use portal_api_types::{Episode, Paged};

use crate::cache::{Debouncer, EpisodeParams, QueryKey, QueryView, build_key};

use super::pagination::PagedQuery;
use super::session::QueryContext;

/// Filters an episode list starts out with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeFilters {
    pub name: String,
    pub page: u32,
}

/// Paged episode list with an optional name filter.
pub struct EpisodeList {
    query: PagedQuery,
    name: Debouncer<String>,
}

impl EpisodeList {
    pub(crate) fn new(context: Rc<QueryContext>, filters: EpisodeFilters) -> Rc<Self> {
        let interval = context.config().search_debounce();
        let list = Rc::new(Self {
            query: PagedQuery::new(context),
            name: Debouncer::new("episode_name", filters.name, interval),
        });
        list.query.pagination().set(filters.page);

        let weak: Weak<Self> = Rc::downgrade(&list);
        list.name.on_settle(move |_| {
            if let Some(list) = weak.upgrade() {
                list.query.pagination().reset();
                list.sync();
            }
        });

        list.sync();
        list
    }

    pub fn set_name(&self, raw: impl Into<String>) {
        self.name.observe(raw.into());
    }

    pub fn set_page(&self, page: u32) {
        self.query.pagination().set(page);
        self.sync();
    }

    pub fn flush(&self) {
        self.name.flush();
    }

    pub fn page(&self) -> u32 {
        self.query.pagination().page()
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.query.pagination().total_pages()
    }

    pub fn current_key(&self) -> QueryKey {
        build_key(&EpisodeParams {
            name: Some(self.name.settled()),
            page: self.page(),
        })
    }

    pub fn view(&self) -> QueryView<Rc<Paged<Episode>>> {
        let view = self.query.view().and_then(|payload| payload.as_episodes());
        if let (Some(page), false) = (view.data.as_ref(), view.is_stale) {
            self.query.pagination().set_total_pages(page.info.pages);
        }
        view
    }

    pub fn refresh(&self) {
        self.query.refresh();
    }

    pub fn watches(&self, key: &QueryKey) -> bool {
        self.query.watches(key)
    }

    pub async fn ready(&self) -> QueryView<Rc<Paged<Episode>>> {
        let mut events = self.query.context().cache().subscribe();
        loop {
            let view = self.view();
            if !view.is_loading || !events.changed(|key| self.watches(key)).await {
                return view;
            }
        }
    }

    fn sync(&self) {
        self.query.sync(self.current_key());
    }
}
