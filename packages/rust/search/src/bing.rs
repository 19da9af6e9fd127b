//! Bing Web Search v7 backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use researchbrief_shared::ItemFailure;

use crate::{RawResult, SearchBackend, classify_request_error};

/// Public Bing Web Search endpoint.
pub const BING_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";

#[derive(Debug, Deserialize)]
struct BingResponse {
    #[serde(default, rename = "webPages")]
    web_pages: Option<BingWebPages>,
}

#[derive(Debug, Deserialize)]
struct BingWebPages {
    #[serde(default)]
    value: Vec<BingPage>,
}

#[derive(Debug, Deserialize)]
struct BingPage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: String,
}

/// Bing backend. `market` is a Bing market code such as `en-CA`.
pub struct BingBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    market: String,
}

impl BingBackend {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            market: market.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for BingBackend {
    async fn fetch_results(&self, query: &str, count: usize) -> Result<Vec<RawResult>, ItemFailure> {
        let count = count.to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .query(&[
                ("q", query),
                ("count", count.as_str()),
                ("offset", "0"),
                ("mkt", self.market.as_str()),
                ("safeSearch", "Strict"),
                ("textDecorations", "false"),
                ("textFormat", "Raw"),
            ])
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ItemFailure::SearchProvider(format!("Bing returned HTTP {status}")));
        }

        let data: BingResponse = response.json().await.map_err(classify_request_error)?;
        let pages = data.web_pages.map(|w| w.value).unwrap_or_default();
        debug!(query, results = pages.len(), "bing search complete");

        Ok(pages
            .into_iter()
            .map(|p| RawResult {
                url: p.url,
                title: p.name,
                snippet: p.snippet,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "bing"
    }
}
