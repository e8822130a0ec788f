//! Cache key definitions.
//!
//! Defines `QueryKey`, the identity of a catalog query, and the builders that
//! derive it from raw view parameters. Builders normalize input so that
//! semantically equal parameter sets always produce equal keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use portal_api_types::{CharacterStatus, RelationRef};

/// First page of every paged collection.
pub const FIRST_PAGE: u32 = 1;

/// A free-text filter with a single canonical "not applied" spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Filter {
    #[default]
    Any,
    Term(String),
}

impl Filter {
    /// Normalize raw input: absent, empty and whitespace-only all mean `Any`.
    pub fn from_input(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(term) if !term.is_empty() => Self::Term(term.to_string()),
            _ => Self::Any,
        }
    }

    pub fn term(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Term(term) => Some(term),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Term(term) => write!(f, "{term:?}"),
        }
    }
}

/// Identity of one catalog query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryKey {
    // Paged collections
    Characters {
        name: Filter,
        status: Option<CharacterStatus>,
        species: Filter,
        page: u32,
    },
    Episodes {
        name: Filter,
        page: u32,
    },

    // Location chain
    LocationSearch {
        name: Filter,
    },
    Location {
        id: u64,
    },
    /// Sorted, de-duplicated relation references.
    Residents {
        refs: Vec<RelationRef>,
    },
}

impl QueryKey {
    /// Key family, used as a log field and metric label.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Characters { .. } => "characters",
            Self::Episodes { .. } => "episodes",
            Self::LocationSearch { .. } => "location_search",
            Self::Location { .. } => "location",
            Self::Residents { .. } => "residents",
        }
    }

    /// Whether this key names an empty relation set, which needs no request.
    pub fn is_empty_relation(&self) -> bool {
        matches!(self, Self::Residents { refs } if refs.is_empty())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Characters {
                name,
                status,
                species,
                page,
            } => {
                let status = status.map_or("*", CharacterStatus::as_str);
                write!(
                    f,
                    "characters[name={name},status={status},species={species},page={page}]"
                )
            }
            Self::Episodes { name, page } => write!(f, "episodes[name={name},page={page}]"),
            Self::LocationSearch { name } => write!(f, "location_search[name={name}]"),
            Self::Location { id } => write!(f, "location[id={id}]"),
            Self::Residents { refs } => {
                write!(f, "residents[n={},#{:016x}]", refs.len(), hash_value(refs))
            }
        }
    }
}

// ============================================================================
// Key Builders
// ============================================================================

/// Parameters that determine a query's identity.
pub trait KeyParams {
    fn build_key(&self) -> QueryKey;
}

/// Derive the canonical key for a parameter set.
pub fn build_key(params: &impl KeyParams) -> QueryKey {
    params.build_key()
}

/// Raw character search parameters as held by the character view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterParams {
    pub name: Option<String>,
    pub status: Option<CharacterStatus>,
    pub species: Option<String>,
    pub page: u32,
}

impl KeyParams for CharacterParams {
    fn build_key(&self) -> QueryKey {
        QueryKey::Characters {
            name: Filter::from_input(self.name.as_deref()),
            status: self.status,
            species: Filter::from_input(self.species.as_deref()),
            page: normalize_page(self.page),
        }
    }
}

/// Raw episode list parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeParams {
    pub name: Option<String>,
    pub page: u32,
}

impl KeyParams for EpisodeParams {
    fn build_key(&self) -> QueryKey {
        QueryKey::Episodes {
            name: Filter::from_input(self.name.as_deref()),
            page: normalize_page(self.page),
        }
    }
}

/// Location name search term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSearchParams {
    pub name: Option<String>,
}

impl KeyParams for LocationSearchParams {
    fn build_key(&self) -> QueryKey {
        QueryKey::LocationSearch {
            name: Filter::from_input(self.name.as_deref()),
        }
    }
}

/// A single location by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationId(pub u64);

impl KeyParams for LocationId {
    fn build_key(&self) -> QueryKey {
        QueryKey::Location { id: self.0 }
    }
}

/// A set of relation references to resolve.
#[derive(Debug, Clone, Copy)]
pub struct RelationSet<'a>(pub &'a [RelationRef]);

impl KeyParams for RelationSet<'_> {
    fn build_key(&self) -> QueryKey {
        let mut refs = self.0.to_vec();
        refs.sort();
        refs.dedup();
        QueryKey::Residents { refs }
    }
}

/// Page numbers are 1-based; zero means the first page.
pub fn normalize_page(page: u32) -> u32 {
    page.max(FIRST_PAGE)
}

// ============================================================================
// Hash Utilities
// ============================================================================

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
