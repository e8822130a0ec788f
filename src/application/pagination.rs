//! Page counter shared by the paged views.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::cache::{FIRST_PAGE, QueryKey, QueryView, StaleRetention};
use crate::domain::Payload;

use super::session::QueryContext;

/// 1-based page counter, clamped to the last known page count.
#[derive(Debug)]
pub struct Pagination {
    page: Cell<u32>,
    total_pages: Cell<Option<u32>>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new()
    }
}

impl Pagination {
    pub fn new() -> Self {
        Self {
            page: Cell::new(FIRST_PAGE),
            total_pages: Cell::new(None),
        }
    }

    pub fn page(&self) -> u32 {
        self.page.get()
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages.get()
    }

    /// Move to `page`, clamped into range; returns the page actually set.
    pub fn set(&self, page: u32) -> u32 {
        let upper = self.total_pages.get().filter(|total| *total > 0);
        let page = match upper {
            Some(total) => page.clamp(FIRST_PAGE, total),
            None => page.max(FIRST_PAGE),
        };
        self.page.set(page);
        page
    }

    /// Back to the first page; returns whether the page changed.
    pub fn reset(&self) -> bool {
        let changed = self.page.replace(FIRST_PAGE) != FIRST_PAGE;
        if changed {
            debug!("Pagination reset to first page");
        }
        changed
    }

    pub fn set_total_pages(&self, total: u32) {
        self.total_pages.set(Some(total));
    }
}

/// Active-key bookkeeping common to the paged views.
pub(crate) struct PagedQuery {
    context: Rc<QueryContext>,
    pagination: Pagination,
    retention: RefCell<StaleRetention<Payload>>,
}

impl PagedQuery {
    pub(crate) fn new(context: Rc<QueryContext>) -> Self {
        Self {
            context,
            pagination: Pagination::new(),
            retention: RefCell::new(StaleRetention::new()),
        }
    }

    pub(crate) fn context(&self) -> &Rc<QueryContext> {
        &self.context
    }

    pub(crate) fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Point the view at `key` and make sure it is fresh.
    pub(crate) fn sync(&self, key: QueryKey) {
        let switched = self
            .retention
            .borrow_mut()
            .activate(Some(key.clone()), self.context.cache());
        if switched {
            self.context.cache().notify_activated(&key);
        }
        drop(self.context.ensure(&key));
    }

    pub(crate) fn refresh(&self) {
        if let Some(key) = self.active_key() {
            drop(self.context.refetch(&key));
        }
    }

    pub(crate) fn active_key(&self) -> Option<QueryKey> {
        self.retention.borrow().active().cloned()
    }

    pub(crate) fn watches(&self, key: &QueryKey) -> bool {
        self.retention.borrow().active() == Some(key)
    }

    pub(crate) fn view(&self) -> QueryView<Payload> {
        self.retention.borrow_mut().view(self.context.cache())
    }
}
