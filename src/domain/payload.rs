//! Decoded query results as stored in the query cache.

use std::rc::Rc;

use portal_api_types::{Character, Episode, Location, Paged};

/// Successful result of one catalog query.
///
/// Variants wrap their data in `Rc` so that cache reads, stale retention and
/// coalesced waiters share one allocation per response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Characters(Rc<Paged<Character>>),
    Episodes(Rc<Paged<Episode>>),
    LocationOptions(Rc<Vec<Location>>),
    Location(Rc<Location>),
    Residents(Rc<Vec<Character>>),
}

impl Payload {
    pub fn characters(page: Paged<Character>) -> Self {
        Self::Characters(Rc::new(page))
    }

    pub fn episodes(page: Paged<Episode>) -> Self {
        Self::Episodes(Rc::new(page))
    }

    pub fn location_options(options: Vec<Location>) -> Self {
        Self::LocationOptions(Rc::new(options))
    }

    pub fn location(location: Location) -> Self {
        Self::Location(Rc::new(location))
    }

    pub fn residents(residents: Vec<Character>) -> Self {
        Self::Residents(Rc::new(residents))
    }

    pub fn as_characters(&self) -> Option<Rc<Paged<Character>>> {
        match self {
            Self::Characters(page) => Some(Rc::clone(page)),
            _ => None,
        }
    }

    pub fn as_episodes(&self) -> Option<Rc<Paged<Episode>>> {
        match self {
            Self::Episodes(page) => Some(Rc::clone(page)),
            _ => None,
        }
    }

    pub fn as_location_options(&self) -> Option<Rc<Vec<Location>>> {
        match self {
            Self::LocationOptions(options) => Some(Rc::clone(options)),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<Rc<Location>> {
        match self {
            Self::Location(location) => Some(Rc::clone(location)),
            _ => None,
        }
    }

    pub fn as_residents(&self) -> Option<Rc<Vec<Character>>> {
        match self {
            Self::Residents(residents) => Some(Rc::clone(residents)),
            _ => None,
        }
    }

    /// Variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Characters(_) => "characters",
            Self::Episodes(_) => "episodes",
            Self::LocationOptions(_) => "location_options",
            Self::Location(_) => "location",
            Self::Residents(_) => "residents",
        }
    }
}
