//! Response shapes of the public character catalog.
//!
//! Every type here is deserialized strictly: required fields must be present
//! with the right JSON type, otherwise decoding fails and the caller reports a
//! shape error for the query. Extra fields sent by the catalog are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Paging envelope returned by every collection endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Total number of matching records.
    pub count: u32,
    /// Total number of pages.
    pub pages: u32,
    #[serde(default)]
    pub next: Option<Url>,
    #[serde(default)]
    pub prev: Option<Url>,
}

/// A single page of a collection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub info: PageInfo,
    pub results: Vec<T>,
}

impl<T> Paged<T> {
    /// The page the catalog answers with when nothing matches the filters.
    pub fn empty() -> Self {
        Self {
            info: PageInfo {
                count: 0,
                pages: 0,
                next: None,
                prev: None,
            },
            results: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Life status of a character, as spelled by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CharacterStatus {
    Alive,
    Dead,
    #[serde(rename = "unknown")]
    Unknown,
}

impl CharacterStatus {
    /// Query-string spelling of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "Alive",
            Self::Dead => "Dead",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a status filter; matching is case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alive" => Some(Self::Alive),
            "dead" => Some(Self::Dead),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for CharacterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: u64,
    pub name: String,
    pub status: CharacterStatus,
    pub species: String,
    pub image: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: u64,
    pub name: String,
    /// Season/episode code such as `S01E01`.
    pub episode: String,
    pub air_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Characters last seen at this location.
    pub residents: Vec<RelationRef>,
}

/// Fetchable reference to another catalog record.
///
/// The catalog expresses relations as absolute URLs of the related record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationRef(Url);

impl RelationRef {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    pub fn parse(value: &str) -> Result<Self, url::ParseError> {
        Url::parse(value).map(Self)
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Numeric id in the last path segment, when there is one.
    pub fn id(&self) -> Option<u64> {
        self.0
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|segment| segment.parse().ok())
    }
}

impl fmt::Display for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Error body the catalog sends alongside non-success statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
