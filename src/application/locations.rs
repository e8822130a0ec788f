//! Location explorer: search term → selected location → its residents.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use portal_api_types::{Character, Location};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{
    Debouncer, DependentStage, Edge, LocationId, LocationSearchParams, QueryKey, QueryView,
    RelationSet, StageState, StaleRetention, Subscription, build_key,
};
use crate::domain::{FetchError, Payload};

use super::session::QueryContext;

/// Downstream edge of the chain: a location's residents.
///
/// A location without residents resolves to an empty list on the spot.
fn residents_edge(payload: &Payload) -> Option<Edge<Payload>> {
    let location = payload.as_location()?;
    let key = build_key(&RelationSet(&location.residents));
    Some(if key.is_empty_relation() {
        Edge::Resolved(key, Payload::residents(Vec::new()))
    } else {
        Edge::Fetch(key)
    })
}

pub struct LocationExplorer {
    context: Rc<QueryContext>,
    query: Debouncer<String>,
    options: RefCell<StaleRetention<Payload>>,
    selected: Cell<Option<u64>>,
    location: RefCell<StaleRetention<Payload>>,
    residents: RefCell<DependentStage<Payload>>,
    listener: RefCell<Option<JoinHandle<()>>>,
}

impl LocationExplorer {
    pub(crate) fn new(context: Rc<QueryContext>) -> Rc<Self> {
        let residents = DependentStage::new(
            Rc::clone(context.scheduler()),
            Rc::clone(context.fetch()),
            context.config().clone(),
            residents_edge,
        );
        let explorer = Rc::new(Self {
            query: Debouncer::new(
                "location_query",
                String::new(),
                context.config().location_debounce(),
            ),
            context,
            options: RefCell::new(StaleRetention::new()),
            selected: Cell::new(None),
            location: RefCell::new(StaleRetention::new()),
            residents: RefCell::new(residents),
            listener: RefCell::new(None),
        });

        let weak: Weak<Self> = Rc::downgrade(&explorer);
        explorer.query.on_settle(move |term: &String| {
            if let Some(explorer) = weak.upgrade() {
                explorer.search(term);
            }
        });

        let listener = tokio::task::spawn_local(follow_location(
            Rc::downgrade(&explorer),
            explorer.context.cache().subscribe(),
        ));
        *explorer.listener.borrow_mut() = Some(listener);
        explorer
    }

    /// Raw search input; takes effect once typing pauses.
    pub fn set_query(&self, raw: impl Into<String>) {
        self.query.observe(raw.into());
    }

    pub fn flush(&self) {
        self.query.flush();
    }

    /// Select a location by id, or clear the selection.
    ///
    /// The selection is independent of the search term: changing the term
    /// later keeps the selected location.
    pub fn select(&self, id: Option<u64>) {
        if self.selected.replace(id) == id {
            return;
        }
        debug!(location_id = ?id, "Location selection changed");

        let key = id.map(|id| build_key(&LocationId(id)));
        {
            let mut location = self.location.borrow_mut();
            location.activate(key.clone(), self.context.cache());
            if key.is_none() {
                location.clear();
            }
        }

        if let Some(key) = key.as_ref() {
            self.context.cache().notify_activated(key);
            drop(self.context.ensure(key));
        }
        self.reevaluate();
    }

    /// Select the search result at `index`; returns the selected id.
    pub fn select_option(&self, index: usize) -> Option<u64> {
        let id = self
            .options()
            .data
            .and_then(|options| options.get(index).map(|location| location.id))?;
        self.select(Some(id));
        Some(id)
    }

    pub fn selected(&self) -> Option<u64> {
        self.selected.get()
    }

    pub fn options(&self) -> QueryView<Rc<Vec<Location>>> {
        self.options
            .borrow_mut()
            .view(self.context.cache())
            .and_then(|payload| payload.as_location_options())
    }

    pub fn location(&self) -> QueryView<Rc<Location>> {
        self.location
            .borrow_mut()
            .view(self.context.cache())
            .and_then(|payload| payload.as_location())
    }

    pub fn residents(&self) -> QueryView<Rc<Vec<Character>>> {
        self.reevaluate();
        self.residents
            .borrow_mut()
            .view()
            .and_then(|payload| payload.as_residents())
    }

    /// State of the residents stage relative to the selected location.
    pub fn chain_state(&self) -> StageState {
        self.reevaluate();
        self.residents.borrow().state().clone()
    }

    /// First error along the chain, location before residents.
    pub fn error(&self) -> Option<FetchError> {
        self.location().error.or_else(|| self.residents().error)
    }

    /// Refetch the selected location; residents follow once it resolves.
    pub fn refresh(&self) {
        if let Some(key) = self.location_key() {
            drop(self.context.refetch(&key));
            self.reevaluate();
        }
    }

    /// Refetch the residents of the selected location.
    pub fn refresh_residents(&self) {
        self.residents.borrow().refresh();
    }

    pub fn watches(&self, key: &QueryKey) -> bool {
        self.options.borrow().active() == Some(key)
            || self.location.borrow().active() == Some(key)
            || self.residents.borrow().active_key() == Some(key)
    }

    /// Wait until every active stage has data or an error to show.
    pub async fn ready(&self) {
        let mut events = self.context.cache().subscribe();
        loop {
            let busy = self.options().is_loading
                || self.location().is_loading
                || self.residents().is_loading
                || self.chain_state() == StageState::UpstreamLoading;
            if !busy || !events.changed(|key| self.watches(key)).await {
                return;
            }
        }
    }

    fn location_key(&self) -> Option<QueryKey> {
        self.selected.get().map(|id| build_key(&LocationId(id)))
    }

    fn search(&self, term: &str) {
        let key = build_key(&LocationSearchParams {
            name: Some(term.to_string()),
        });
        let mut options = self.options.borrow_mut();
        if matches!(&key, QueryKey::LocationSearch { name } if name.is_any()) {
            options.activate(None, self.context.cache());
            options.clear();
            return;
        }
        if options.activate(Some(key.clone()), self.context.cache()) {
            self.context.cache().notify_activated(&key);
        }
        drop(self.context.ensure(&key));
    }

    fn reevaluate(&self) {
        let upstream = self
            .location_key()
            .map(|key| self.context.cache().get(&key));
        self.residents.borrow_mut().evaluate(upstream.as_ref());
    }
}

impl Drop for LocationExplorer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Re-evaluate the residents stage whenever the selected location's entry
/// changes, so residents load without the UI polling.
async fn follow_location(explorer: Weak<LocationExplorer>, mut events: Subscription) {
    loop {
        let changed = events
            .changed(|key| {
                explorer
                    .upgrade()
                    .is_some_and(|explorer| explorer.location_key().as_ref() == Some(key))
            })
            .await;
        let Some(explorer) = explorer.upgrade() else {
            return;
        };
        if !changed {
            return;
        }
        explorer.reevaluate();
    }
}
