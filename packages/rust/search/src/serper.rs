//! Serper (Google Search) backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use researchbrief_shared::ItemFailure;

use crate::{RawResult, SearchBackend, classify_request_error};

pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

pub struct SerperBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl SerperBackend {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchBackend for SerperBackend {
    async fn fetch_results(&self, query: &str, count: usize) -> Result<Vec<RawResult>, ItemFailure> {
        let body = serde_json::json!({
            "q": query,
            "num": count,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ItemFailure::SearchProvider(format!("Serper returned HTTP {status}")));
        }

        let data: SerperResponse = response.json().await.map_err(classify_request_error)?;
        debug!(query, results = data.organic.len(), "serper search complete");

        Ok(data
            .organic
            .into_iter()
            .map(|r| RawResult {
                url: r.link,
                title: r.title,
                snippet: r.snippet,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "serper"
    }
}
