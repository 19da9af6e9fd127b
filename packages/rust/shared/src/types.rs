//! Core domain types for a research request and its response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ResearchError, Result};

/// Upper bound on `subject` and `purpose` length, in characters.
pub const MAX_FIELD_CHARS: usize = 500;

/// Upper bound on `jurisdiction` length, in characters.
pub const MAX_JURISDICTION_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// ResearchRequest
// ---------------------------------------------------------------------------

/// Body of `POST /search-and-summarize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub subject: String,
    pub purpose: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

impl ResearchRequest {
    pub fn new(
        subject: impl Into<String>,
        purpose: impl Into<String>,
        jurisdiction: Option<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            purpose: purpose.into(),
            jurisdiction,
        }
    }

    /// Validate and normalize the request.
    ///
    /// Fields are trimmed; a blank jurisdiction becomes `None`.
    pub fn validated(&self) -> Result<Self> {
        let subject = self.subject.trim();
        let purpose = self.purpose.trim();

        if subject.is_empty() {
            return Err(ResearchError::validation("subject must not be empty"));
        }
        if purpose.is_empty() {
            return Err(ResearchError::validation("purpose must not be empty"));
        }
        if subject.chars().count() > MAX_FIELD_CHARS {
            return Err(ResearchError::validation(format!(
                "subject exceeds {MAX_FIELD_CHARS} characters"
            )));
        }
        if purpose.chars().count() > MAX_FIELD_CHARS {
            return Err(ResearchError::validation(format!(
                "purpose exceeds {MAX_FIELD_CHARS} characters"
            )));
        }

        let jurisdiction = self
            .jurisdiction
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty());

        if let Some(j) = jurisdiction {
            if j.chars().count() > MAX_JURISDICTION_CHARS {
                return Err(ResearchError::validation(format!(
                    "jurisdiction exceeds {MAX_JURISDICTION_CHARS} characters"
                )));
            }
        }

        Ok(Self {
            subject: subject.to_string(),
            purpose: purpose.to_string(),
            jurisdiction: jurisdiction.map(String::from),
        })
    }
}

// ---------------------------------------------------------------------------
// SearchQuery
// ---------------------------------------------------------------------------

/// Query category taxonomy used to diversify search coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Background,
    Recent,
    Policy,
    Statistics,
    News,
}

impl QueryCategory {
    /// All categories in generation-priority order.
    pub const ALL: [QueryCategory; 5] = [
        Self::Background,
        Self::Recent,
        Self::Policy,
        Self::Statistics,
        Self::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Recent => "recent",
            Self::Policy => "policy",
            Self::Statistics => "statistics",
            Self::News => "news",
        }
    }

    /// Map a free-form label (e.g. from a language model) onto the taxonomy.
    /// Unknown labels fall back to `Background`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "recent" | "current" | "updates" | "developments" => Self::Recent,
            "policy" | "regulation" | "regulatory" | "official" => Self::Policy,
            "statistics" | "stats" | "data" => Self::Statistics,
            "news" => Self::News,
            _ => Self::Background,
        }
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single categorized search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub category: QueryCategory,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, category: QueryCategory) -> Self {
        Self {
            query: query.into(),
            category,
        }
    }
}

// ---------------------------------------------------------------------------
// SearchHit
// ---------------------------------------------------------------------------

/// One ranked result from a web-search provider. Never returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub snippet: String,
    /// 1-based position within its query's result list.
    pub rank: usize,
    /// Index of the query (in generation order) that produced this hit.
    pub query_index: usize,
}

// ---------------------------------------------------------------------------
// ExtractedDocument
// ---------------------------------------------------------------------------

/// Outcome of a successful extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Complete,
    /// Text was cut at the character budget.
    Truncated,
}

/// Readable text pulled from one page, handed from the extractor to the summarizer.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Final URL requested (before redirects).
    pub url: String,
    pub domain: String,
    /// Page `<title>` or first `h1`, if any.
    pub title: Option<String>,
    pub text: String,
    /// Size of the response body in bytes.
    pub byte_length: usize,
    pub status: ExtractionStatus,
    pub date_accessed: DateTime<Utc>,
    /// SHA-256 of `text`, hex-encoded.
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// SourceSummary / ResearchResponse
// ---------------------------------------------------------------------------

/// One successfully extracted and summarized source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub title: String,
    pub url: String,
    pub domain: String,
    pub date_accessed: DateTime<Utc>,
    pub source_summary: Vec<String>,
}

/// Terminal artifact of a research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub queries: Vec<SearchQuery>,
    pub summary: Vec<String>,
    pub sources: Vec<SourceSummary>,
    /// Seconds from orchestrator start to final assembly.
    pub processing_time: f64,
}
