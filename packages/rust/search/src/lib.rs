//! Web search for ResearchBrief.
//!
//! [`WebSearch`] is the capability the pipeline calls. [`SearchClient`]
//! implements it on top of a provider [`SearchBackend`] (Bing or Serper) and
//! owns everything provider-independent: the optional site filter, dropping
//! unreadable links, trust re-ranking, truncation, and 1-based ranks.

pub mod bing;
pub mod ranking;
pub mod serper;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use researchbrief_shared::{
    ItemFailure, ResearchError, SearchConfig, SearchHit, SearchProviderKind, SearchQuery,
    validate_api_key,
};

pub use bing::{BING_ENDPOINT, BingBackend};
pub use ranking::{domain_of, is_document_link, trust_score};
pub use serper::{SERPER_ENDPOINT, SerperBackend};

/// Largest page size any supported provider accepts.
const MAX_PROVIDER_COUNT: usize = 50;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One unprocessed result as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// A web-search provider API.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Fetch up to `count` results for `query`, in provider relevance order.
    async fn fetch_results(&self, query: &str, count: usize) -> Result<Vec<RawResult>, ItemFailure>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Search capability used by the pipeline.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Ranked hits for `query`, at most `max_results` of them.
    ///
    /// `query_index` on each hit is 0; the caller owns query numbering.
    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<SearchHit>, ItemFailure>;
}

/// Map a transport error onto the per-query failure kinds.
pub(crate) fn classify_request_error(err: reqwest::Error) -> ItemFailure {
    if err.is_timeout() {
        ItemFailure::SearchTimeout
    } else if err.is_decode() {
        ItemFailure::SearchProvider(format!("malformed response: {err}"))
    } else {
        ItemFailure::SearchProvider(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SearchClient
// ---------------------------------------------------------------------------

/// Provider-independent search client.
pub struct SearchClient {
    backend: Box<dyn SearchBackend>,
    site_filter: Option<String>,
    trust_ranking: bool,
    trusted_only: bool,
}

impl SearchClient {
    pub fn new(backend: Box<dyn SearchBackend>) -> Self {
        Self {
            backend,
            site_filter: None,
            trust_ranking: false,
            trusted_only: false,
        }
    }

    /// Append `filter` (e.g. `(site:.gov OR site:.gc.ca)`) to every query.
    pub fn with_site_filter(mut self, filter: Option<String>) -> Self {
        self.site_filter = filter
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        self
    }

    /// Re-rank by domain trust; with `trusted_only`, drop untrusted domains.
    pub fn with_trust_ranking(mut self, enabled: bool, trusted_only: bool) -> Self {
        self.trust_ranking = enabled;
        self.trusted_only = trusted_only;
        self
    }

    fn query_text(&self, query: &str) -> String {
        match &self.site_filter {
            Some(filter) => format!("{query} {filter}"),
            None => query.to_string(),
        }
    }

    /// Filter and rank raw provider output into hits.
    fn rank_results(&self, raw: Vec<RawResult>, max_results: usize) -> Vec<SearchHit> {
        let mut candidates: Vec<(u8, SearchHit)> = raw
            .into_iter()
            .filter_map(|r| {
                let url = r.url.trim().to_string();
                let domain = domain_of(&url)?;
                if is_document_link(&url) {
                    return None;
                }
                let score = trust_score(&domain);
                if self.trusted_only && score == 0 {
                    return None;
                }
                Some((
                    score,
                    SearchHit {
                        url,
                        title: r.title.trim().to_string(),
                        domain,
                        snippet: r.snippet.trim().to_string(),
                        rank: 0,
                        query_index: 0,
                    },
                ))
            })
            .collect();

        if self.trust_ranking {
            // Stable: provider order breaks ties.
            candidates.sort_by(|a, b| b.0.cmp(&a.0));
        }

        candidates
            .into_iter()
            .take(max_results)
            .enumerate()
            .map(|(i, (_, mut hit))| {
                hit.rank = i + 1;
                hit
            })
            .collect()
    }
}

#[async_trait]
impl WebSearch for SearchClient {
    #[instrument(skip_all, fields(category = %query.category))]
    async fn search(&self, query: &SearchQuery, max_results: usize) -> Result<Vec<SearchHit>, ItemFailure> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        // Over-fetch so filtering still leaves `max_results` hits.
        let count = (max_results * 2).min(MAX_PROVIDER_COUNT);
        let text = self.query_text(&query.query);
        let raw = self.backend.fetch_results(&text, count).await?;
        let fetched = raw.len();

        let hits = self.rank_results(raw, max_results);
        debug!(provider = self.backend.name(), query = %query.query, fetched, kept = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Build the configured provider's client, reading its API key from the environment.
pub fn build_search_client(config: &SearchConfig) -> Result<SearchClient, ResearchError> {
    let api_key = validate_api_key(&config.api_key_env, "Search")?;

    let http = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|e| ResearchError::config(format!("failed to build HTTP client: {e}")))?;

    let backend: Box<dyn SearchBackend> = match config.provider {
        SearchProviderKind::Bing => Box::new(BingBackend::new(
            http,
            config.endpoint.as_deref().unwrap_or(BING_ENDPOINT),
            api_key,
            config.market.clone(),
        )),
        SearchProviderKind::Serper => Box::new(SerperBackend::new(
            http,
            config.endpoint.as_deref().unwrap_or(SERPER_ENDPOINT),
            api_key,
        )),
    };

    Ok(SearchClient::new(backend)
        .with_site_filter(config.site_filter.clone())
        .with_trust_ranking(config.trust_ranking, config.trusted_only))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
