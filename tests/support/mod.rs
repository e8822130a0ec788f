//! Scripted in-memory catalog shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use portal_api_types::{
    Character, CharacterStatus, Episode, Location, PageInfo, Paged, RelationRef,
};
use portal_query::application::catalog::{CatalogService, CharacterQuery};
use portal_query::domain::FetchError;
use url::Url;

pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

/// Catalog that answers from fixed data after a scripted delay.
///
/// Every call is recorded; the first name of a character page carries the
/// call number so tests can tell responses of the same key apart.
pub struct ScriptedCatalog {
    calls: RefCell<Vec<String>>,
    latency: RefCell<VecDeque<Duration>>,
    locations: HashMap<u64, Location>,
    failing_characters: Cell<bool>,
}

impl Default for ScriptedCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCatalog {
    pub fn new() -> Self {
        let locations = [
            location(1, "Earth (C-137)", "Planet", &[38, 45]),
            location(2, "Abadango", "Cluster", &[6]),
            location(3, "Citadel of Ricks", "Space station", &[]),
        ]
        .into_iter()
        .map(|location| (location.id, location))
        .collect();

        Self {
            calls: RefCell::new(Vec::new()),
            latency: RefCell::new(VecDeque::new()),
            locations,
            failing_characters: Cell::new(false),
        }
    }

    /// Delays for the next calls, in order; later calls use the default.
    pub fn script_latency(&self, delays: impl IntoIterator<Item = Duration>) {
        self.latency.borrow_mut().extend(delays);
    }

    pub fn fail_characters(&self, failing: bool) {
        self.failing_characters.set(failing);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) -> (usize, Duration) {
        let mut calls = self.calls.borrow_mut();
        calls.push(call);
        let delay = self
            .latency
            .borrow_mut()
            .pop_front()
            .unwrap_or(DEFAULT_LATENCY);
        (calls.len(), delay)
    }
}

#[async_trait(?Send)]
impl CatalogService for ScriptedCatalog {
    async fn characters(&self, query: &CharacterQuery) -> Result<Paged<Character>, FetchError> {
        let name = query.name.clone().unwrap_or_default();
        let (call, delay) = self.record(format!("characters name={name} page={}", query.page));
        tokio::time::sleep(delay).await;

        if self.failing_characters.get() {
            return Err(FetchError::response(500, "catalog unavailable"));
        }
        let status = query.status.unwrap_or(CharacterStatus::Alive);
        Ok(page(
            vec![character(u64::from(query.page), &format!("{name}#{call}"), status)],
            3,
        ))
    }

    async fn episodes(&self, name: Option<&str>, page_number: u32) -> Result<Paged<Episode>, FetchError> {
        let name = name.unwrap_or_default().to_string();
        let (call, delay) = self.record(format!("episodes name={name} page={page_number}"));
        tokio::time::sleep(delay).await;

        Ok(page(
            vec![Episode {
                id: u64::from(page_number),
                name: format!("{name}#{call}"),
                episode: format!("S01E{page_number:02}"),
                air_date: "December 2, 2013".to_string(),
            }],
            2,
        ))
    }

    async fn search_locations(&self, name: &str) -> Result<Vec<Location>, FetchError> {
        let (_, delay) = self.record(format!("search_locations name={name}"));
        tokio::time::sleep(delay).await;

        let needle = name.to_lowercase();
        let mut found: Vec<Location> = self
            .locations
            .values()
            .filter(|location| location.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by_key(|location| location.id);
        Ok(found)
    }

    async fn location(&self, id: u64) -> Result<Location, FetchError> {
        let (_, delay) = self.record(format!("location id={id}"));
        tokio::time::sleep(delay).await;

        self.locations
            .get(&id)
            .cloned()
            .ok_or_else(|| FetchError::response(404, "Location not found"))
    }

    async fn resolve_characters(&self, refs: &[RelationRef]) -> Result<Vec<Character>, FetchError> {
        let ids: Vec<String> = refs
            .iter()
            .filter_map(RelationRef::id)
            .map(|id| id.to_string())
            .collect();
        let (_, delay) = self.record(format!("residents ids={}", ids.join(",")));
        tokio::time::sleep(delay).await;

        Ok(refs
            .iter()
            .filter_map(RelationRef::id)
            .map(|id| character(id, &format!("Resident {id}"), CharacterStatus::Alive))
            .collect())
    }
}

pub fn character(id: u64, name: &str, status: CharacterStatus) -> Character {
    Character {
        id,
        name: name.to_string(),
        status,
        species: "Human".to_string(),
        image: Url::parse(&format!(
            "https://rickandmortyapi.com/api/character/avatar/{id}.jpeg"
        ))
        .expect("image url"),
    }
}

pub fn location(id: u64, name: &str, kind: &str, residents: &[u64]) -> Location {
    Location {
        id,
        name: name.to_string(),
        kind: kind.to_string(),
        residents: residents
            .iter()
            .map(|id| {
                RelationRef::parse(&format!("https://rickandmortyapi.com/api/character/{id}"))
                    .expect("relation url")
            })
            .collect(),
    }
}

pub fn page<T>(results: Vec<T>, pages: u32) -> Paged<T> {
    Paged {
        info: PageInfo {
            count: pages * 20,
            pages,
            next: None,
            prev: None,
        },
        results,
    }
}
