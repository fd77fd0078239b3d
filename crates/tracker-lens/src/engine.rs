//! Entry points: search one site, search many, assemble a user profile.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::aggregator::aggregate;
use crate::list::extract_list;
use crate::registry::SiteRegistry;
use crate::request::{compose, SearchQuery};
use crate::resilience::ResilientFetcher;
use crate::site::Site;
use crate::transport::{BypassTokenProvider, Transport};
use crate::types::{EngineError, EngineResult, TorrentRecord, UserProfile};

/// Outcome of a search on one site within a cross-site search.
#[derive(Debug)]
pub struct SiteResult {
    pub site: String,
    pub result: EngineResult<Vec<TorrentRecord>>,
}

/// Stateless driver over a transport; safe to share across tasks.
#[derive(Clone)]
pub struct Engine {
    transport: Arc<dyn Transport>,
    bypass: Option<Arc<dyn BypassTokenProvider>>,
    cookies: HashMap<String, String>,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            bypass: None,
            cookies: HashMap::new(),
        }
    }

    pub fn with_bypass(mut self, provider: Arc<dyn BypassTokenProvider>) -> Self {
        self.bypass = Some(provider);
        self
    }

    /// Send `cookie` with every request to site `site`.
    pub fn with_cookie(mut self, site: &str, cookie: impl Into<String>) -> Self {
        self.cookies.insert(site.to_string(), cookie.into());
        self
    }

    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    fn fetcher<'a>(&'a self, site: &'a Site) -> ResilientFetcher<'a> {
        ResilientFetcher {
            transport: self.transport.as_ref(),
            bypass: self.bypass.as_deref(),
            login: &site.definition.login,
            site_id: site.id(),
            cookie: self.cookies.get(site.id()).map(String::as_str),
        }
    }

    /// Search `site` and return its records.
    pub async fn search(&self, site: &Site, query: &SearchQuery) -> EngineResult<Vec<TorrentRecord>> {
        let composed = compose(site, query)?;
        let request = composed.to_http()?;
        let response = self
            .fetcher(site)
            .fetch(request, composed.config.response_type)
            .await?;

        let list = match &site.definition.search {
            Some(search) => &search.list,
            None => {
                return Err(EngineError::Config(format!(
                    "site '{}' does not support search",
                    site.id()
                )))
            }
        };
        let document = site.parse_response(&response.body, composed.config.response_type)?;
        extract_list(document.root(), &composed.base_url, site.id(), list)
    }

    /// Search several sites, at most `concurrency` at a time.
    ///
    /// Results come back in the order of `ids`; one site failing does not
    /// affect the others.
    pub async fn search_many(
        &self,
        registry: &SiteRegistry,
        ids: &[String],
        query: &SearchQuery,
        concurrency: usize,
    ) -> Vec<SiteResult> {
        let mut results: Vec<(usize, SiteResult)> = stream::iter(ids.iter().enumerate())
            .map(|(index, id)| async move {
                let result = match registry.get(id) {
                    Ok(site) => self.search(site, query).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::warn!(site = %id, "search failed: {e}");
                }
                (
                    index,
                    SiteResult {
                        site: id.clone(),
                        result,
                    },
                )
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Run `site`'s user-info steps.
    pub async fn user_info(&self, site: &Site) -> EngineResult<UserProfile> {
        aggregate(site, &self.fetcher(site)).await
    }
}
