//! Catalog service trait describing the remote data adapter, and the dispatch
//! from query keys to catalog calls.

use std::rc::Rc;

use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture};
use portal_api_types::{Character, CharacterStatus, Episode, Location, Paged, RelationRef};

use crate::cache::{FetchFn, FetchResult, QueryKey};
use crate::domain::{FetchError, Payload};

/// Applied filters of a character page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterQuery {
    pub name: Option<String>,
    pub status: Option<CharacterStatus>,
    pub species: Option<String>,
    pub page: u32,
}

/// Read-only access to the remote catalog.
///
/// Implementations report absence of matches on collection queries as an
/// empty page rather than an error.
#[async_trait(?Send)]
pub trait CatalogService {
    async fn characters(&self, query: &CharacterQuery) -> Result<Paged<Character>, FetchError>;

    async fn episodes(&self, name: Option<&str>, page: u32) -> Result<Paged<Episode>, FetchError>;

    /// Locations whose name matches `name`; an empty term yields no results.
    async fn search_locations(&self, name: &str) -> Result<Vec<Location>, FetchError>;

    async fn location(&self, id: u64) -> Result<Location, FetchError>;

    /// Resolve relation references to characters, in the given order.
    async fn resolve_characters(
        &self,
        refs: &[RelationRef],
    ) -> Result<Vec<Character>, FetchError>;
}

/// Run the catalog call that `key` names.
///
/// An inactive search term and an empty relation set resolve to empty
/// results without touching the catalog.
pub async fn fetch_payload(catalog: &dyn CatalogService, key: &QueryKey) -> FetchResult<Payload> {
    match key {
        QueryKey::Characters {
            name,
            status,
            species,
            page,
        } => {
            let query = CharacterQuery {
                name: name.term().map(str::to_string),
                status: *status,
                species: species.term().map(str::to_string),
                page: *page,
            };
            catalog.characters(&query).await.map(Payload::characters)
        }
        QueryKey::Episodes { name, page } => catalog
            .episodes(name.term(), *page)
            .await
            .map(Payload::episodes),
        QueryKey::LocationSearch { name } => match name.term() {
            Some(term) => catalog
                .search_locations(term)
                .await
                .map(Payload::location_options),
            None => Ok(Payload::location_options(Vec::new())),
        },
        QueryKey::Location { id } => catalog.location(*id).await.map(Payload::location),
        QueryKey::Residents { refs } if refs.is_empty() => Ok(Payload::residents(Vec::new())),
        QueryKey::Residents { refs } => catalog
            .resolve_characters(refs)
            .await
            .map(Payload::residents),
    }
}

/// Type-erased fetch function over `catalog`, shared by every view of a session.
pub fn payload_fetcher(catalog: Rc<dyn CatalogService>) -> FetchFn<Payload> {
    Rc::new(move |key: QueryKey| -> LocalBoxFuture<'static, FetchResult<Payload>> {
        let catalog = Rc::clone(&catalog);
        async move { fetch_payload(catalog.as_ref(), &key).await }.boxed_local()
    })
}
