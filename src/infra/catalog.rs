//! HTTP adapter for the public character catalog.

use async_trait::async_trait;
use futures::future::try_join_all;
use portal_api_types::{Character, Episode, ErrorBody, Location, Paged, RelationRef};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::application::catalog::{CatalogService, CharacterQuery};
use crate::config::CatalogSettings;
use crate::domain::FetchError;

use super::error::InfraError;

const LOCATION_NOT_FOUND: &str = "Location not found";

#[derive(Clone, Debug)]
pub struct HttpCatalog {
    client: Client,
    base: Url,
}

struct Reply {
    status: StatusCode,
    body: Vec<u8>,
}

impl Reply {
    fn decode<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|err| FetchError::shape(err.to_string()))
    }

    /// Error text from the catalog's error body, falling back to `fallback`.
    fn error_message(&self, fallback: &str) -> String {
        serde_json::from_slice::<ErrorBody>(&self.body)
            .map(|body| body.error)
            .unwrap_or_else(|_| fallback.to_string())
    }

    fn failure(&self, fallback: &str) -> FetchError {
        FetchError::response(self.status.as_u16(), self.error_message(fallback))
    }
}

impl HttpCatalog {
    pub fn new(settings: &CatalogSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            base: settings.base_url.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("portal-query/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| FetchError::transport(format!("invalid catalog url: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Reply, FetchError> {
        debug!(url = %url, "Catalog request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?
            .to_vec();
        Ok(Reply { status, body })
    }

    /// Collection endpoints answer 404 when nothing matches the filters.
    async fn page<T: DeserializeOwned>(
        &self,
        url: Url,
        fallback: &str,
    ) -> Result<Paged<T>, FetchError> {
        let reply = self.get(url).await?;
        match reply.status {
            status if status.is_success() => reply.decode(),
            StatusCode::NOT_FOUND => Ok(Paged::empty()),
            _ => Err(reply.failure(fallback)),
        }
    }

    async fn character(&self, reference: &RelationRef) -> Result<Character, FetchError> {
        let reply = self.get(reference.url().clone()).await?;
        if !reply.status.is_success() {
            return Err(reply.failure("Character not found"));
        }
        reply.decode()
    }
}

#[async_trait(?Send)]
impl CatalogService for HttpCatalog {
    #[instrument(level = "debug", skip(self))]
    async fn characters(&self, query: &CharacterQuery) -> Result<Paged<Character>, FetchError> {
        let mut params = Vec::new();
        if let Some(name) = query.name.as_ref() {
            params.push(("name", name.clone()));
        }
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(species) = query.species.as_ref() {
            params.push(("species", species.clone()));
        }
        params.push(("page", query.page.to_string()));

        let url = self.url("character", &params)?;
        self.page(url, "Character search failed").await
    }

    #[instrument(level = "debug", skip(self))]
    async fn episodes(&self, name: Option<&str>, page: u32) -> Result<Paged<Episode>, FetchError> {
        let mut params = vec![("page", page.to_string())];
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }

        let url = self.url("episode", &params)?;
        self.page(url, "Episode listing failed").await
    }

    #[instrument(level = "debug", skip(self))]
    async fn search_locations(&self, name: &str) -> Result<Vec<Location>, FetchError> {
        if name.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("location", &[("name", name.to_string())])?;
        let reply = self.get(url).await?;
        if !reply.status.is_success() {
            debug!(status = %reply.status, "Location search returned no options");
            return Ok(Vec::new());
        }
        reply.decode::<Paged<Location>>().map(|page| page.results)
    }

    #[instrument(level = "debug", skip(self))]
    async fn location(&self, id: u64) -> Result<Location, FetchError> {
        let url = self.url(&format!("location/{id}"), &[])?;
        let reply = self.get(url).await?;
        if !reply.status.is_success() {
            return Err(reply.failure(LOCATION_NOT_FOUND));
        }
        reply.decode()
    }

    #[instrument(level = "debug", skip(self, refs), fields(count = refs.len()))]
    async fn resolve_characters(
        &self,
        refs: &[RelationRef],
    ) -> Result<Vec<Character>, FetchError> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }
        try_join_all(refs.iter().map(|reference| self.character(reference))).await
    }
}
