//! Content extraction for ResearchBrief.
//!
//! [`PageExtractor`] fetches one URL through an SSRF-guarded client and
//! reduces the page to clean, summarizable text:
//!
//! 1. Fetch with bounded redirects, a timeout, and content-type/size checks.
//! 2. Pick the main-content region and walk its text, skipping site chrome.
//! 3. Run the cleanup passes, check for boilerplate repetition, and truncate
//!    to the character budget.

pub mod fetch;
mod cleanup;
mod readability;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use researchbrief_shared::{
    ExtractedDocument, ExtractionConfig, ExtractionStatus, ItemFailure, ResearchError,
};

pub use fetch::{compute_hash, is_ssrf_target, normalize_url};

use crate::fetch::{BodyKind, build_client, fetch_body};

/// Extraction capability used by the pipeline.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch `url` and reduce it to readable text.
    async fn extract(&self, url: &str) -> Result<ExtractedDocument, ItemFailure>;
}

/// HTTP-backed [`ContentExtractor`].
pub struct PageExtractor {
    config: ExtractionConfig,
    client: Client,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl PageExtractor {
    /// Create an extractor with the given configuration.
    pub fn new(config: ExtractionConfig) -> Result<Self, ResearchError> {
        let client = build_client(&config, false)?;
        Ok(Self {
            config,
            client,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.client = build_client(&self.config, true).expect("client builds");
        self.allow_localhost = true;
        self
    }

    /// Turn a fetched body into a document.
    fn build_document(
        &self,
        url: &Url,
        kind: BodyKind,
        body: &str,
    ) -> Result<ExtractedDocument, ItemFailure> {
        let (title, raw_text) = match kind {
            BodyKind::Html => {
                let doc = Html::parse_document(body);
                (
                    readability::extract_title(&doc),
                    readability::extract_main_text(&doc, self.config.min_chars),
                )
            }
            BodyKind::PlainText => (None, body.to_string()),
        };

        let text = cleanup::run_pipeline(&raw_text);
        if text.is_empty() {
            return Err(ItemFailure::EmptyContent);
        }
        if cleanup::is_too_short(&text, self.config.min_words) {
            debug!(%url, min_words = self.config.min_words, "rejecting short content");
            return Err(ItemFailure::EmptyContent);
        }
        if cleanup::is_repetitive(&text) {
            debug!(%url, "rejecting repetitive content");
            return Err(ItemFailure::EmptyContent);
        }

        let (text, truncated) = cleanup::truncate_chars(text, self.config.max_chars.max(1));
        let status = if truncated {
            ExtractionStatus::Truncated
        } else {
            ExtractionStatus::Complete
        };

        Ok(ExtractedDocument {
            url: url.to_string(),
            domain: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            title,
            content_hash: compute_hash(&text),
            text,
            byte_length: body.len(),
            status,
            date_accessed: Utc::now(),
        })
    }
}

#[async_trait]
impl ContentExtractor for PageExtractor {
    #[instrument(skip_all, fields(url = %url))]
    async fn extract(&self, url: &str) -> Result<ExtractedDocument, ItemFailure> {
        let parsed = Url::parse(url).map_err(|e| ItemFailure::BlockedUrl(format!("{url}: {e}")))?;

        if !self.allow_localhost && is_ssrf_target(&parsed) {
            return Err(ItemFailure::BlockedUrl(url.to_string()));
        }

        let fetched = fetch_body(&self.client, &parsed, self.config.max_bytes).await?;
        let document = self.build_document(&parsed, fetched.kind, &fetched.body)?;

        debug!(
            chars = document.text.chars().count(),
            bytes = document.byte_length,
            status = ?document.status,
            "page extracted"
        );
        Ok(document)
    }
}
