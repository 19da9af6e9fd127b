//! Application configuration for ResearchBrief.
//!
//! User config lives at `~/.researchbrief/researchbrief.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are never stored in the file, only the names of the env vars holding them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ResearchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "researchbrief.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".researchbrief";

/// Hard cap on generated queries.
pub const MAX_QUERIES_CAP: usize = 10;

/// Hard cap on bullets per source.
pub const MAX_SOURCE_BULLETS_CAP: usize = 6;

/// Hard cap on cross-source summary bullets.
pub const MAX_SUMMARY_BULLETS_CAP: usize = 10;

// ---------------------------------------------------------------------------
// Config structs (matching researchbrief.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub query_generation: QueryGenerationConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub summarization: SummarizationConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[llm]` section: OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for query generation.
    #[serde(default = "default_query_model")]
    pub query_model: String,

    /// Model used for per-source summaries.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Model used for the cross-source synthesis.
    #[serde(default = "default_summary_model")]
    pub synthesis_model: String,

    /// Per-call timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            query_model: default_query_model(),
            summary_model: default_summary_model(),
            synthesis_model: default_summary_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_query_model() -> String {
    "gpt-4o-mini".into()
}
fn default_summary_model() -> String {
    "gpt-4o".into()
}
fn default_llm_timeout() -> u64 {
    45
}

/// `[query_generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGenerationConfig {
    /// Maximum number of queries per request (clamped to 1..=10).
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Fall back to templated queries when the model is unavailable.
    #[serde(default)]
    pub fallback_to_templates: bool,
}

impl Default for QueryGenerationConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            fallback_to_templates: false,
        }
    }
}

fn default_max_queries() -> usize {
    5
}

/// Supported web-search providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    Bing,
    Serper,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_provider")]
    pub provider: SearchProviderKind,

    /// Name of the env var holding the provider API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Override the provider endpoint (mainly for tests and proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results_per_query: usize,

    /// Appended to every query, e.g. `(site:.gov OR site:.gc.ca)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_filter: Option<String>,

    /// Re-rank hits by domain trust score.
    #[serde(default)]
    pub trust_ranking: bool,

    /// Drop hits whose domain has no trust score.
    #[serde(default)]
    pub trusted_only: bool,

    /// Bing market code.
    #[serde(default = "default_market")]
    pub market: String,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key_env: default_search_key_env(),
            endpoint: None,
            max_results_per_query: default_max_results(),
            site_filter: None,
            trust_ranking: false,
            trusted_only: false,
            market: default_market(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_provider() -> SearchProviderKind {
    SearchProviderKind::Bing
}
fn default_search_key_env() -> String {
    "BING_SEARCH_API_KEY".into()
}
fn default_max_results() -> usize {
    5
}
fn default_market() -> String {
    "en-CA".into()
}
fn default_search_timeout() -> u64 {
    15
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Character budget for extracted text.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Minimum text length for a main-content candidate to win over `<body>`.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Cleaned pages with fewer words are rejected as empty content.
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    /// Largest accepted response body, checked against `Content-Length` and
    /// again while the body streams in.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            min_words: default_min_words(),
            max_bytes: default_max_bytes(),
            max_redirects: default_max_redirects(),
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_chars() -> usize {
    50_000
}
fn default_min_chars() -> usize {
    200
}
fn default_min_words() -> usize {
    100
}
fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_max_redirects() -> usize {
    5
}
fn default_fetch_timeout() -> u64 {
    20
}
fn default_user_agent() -> String {
    concat!("ResearchBrief/", env!("CARGO_PKG_VERSION")).into()
}

/// `[summarization]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Bullets per source (clamped to 1..=6).
    #[serde(default = "default_max_bullets")]
    pub max_bullets: usize,

    /// Chunk size for long documents.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Documents shorter than this are too sparse to summarize.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            max_bullets: default_max_bullets(),
            chunk_chars: default_chunk_chars(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_max_bullets() -> usize {
    4
}
fn default_chunk_chars() -> usize {
    4_000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global request deadline.
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Cap on deduplicated URLs sent to extraction.
    #[serde(default = "default_max_sources")]
    pub max_total_sources: usize,

    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,

    #[serde(default = "default_extract_concurrency")]
    pub extract_concurrency: usize,

    #[serde(default = "default_summarize_concurrency")]
    pub summarize_concurrency: usize,

    /// Cross-source summary size (clamped to 1..=10).
    #[serde(default = "default_summary_bullets")]
    pub max_summary_bullets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline(),
            max_total_sources: default_max_sources(),
            search_concurrency: default_search_concurrency(),
            extract_concurrency: default_extract_concurrency(),
            summarize_concurrency: default_summarize_concurrency(),
            max_summary_bullets: default_summary_bullets(),
        }
    }
}

fn default_deadline() -> u64 {
    120
}
fn default_max_sources() -> usize {
    15
}
fn default_search_concurrency() -> usize {
    4
}
fn default_extract_concurrency() -> usize {
    6
}
fn default_summarize_concurrency() -> usize {
    3
}
fn default_summary_bullets() -> usize {
    7
}

// ---------------------------------------------------------------------------
// Runtime pipeline limits (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime limits for one orchestrator, with every bound clamped to a sane range.
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub deadline: Duration,
    pub max_queries: usize,
    pub max_results_per_query: usize,
    pub max_total_sources: usize,
    pub search_concurrency: usize,
    pub extract_concurrency: usize,
    pub summarize_concurrency: usize,
    pub max_summary_bullets: usize,
    pub search_timeout: Duration,
    pub fetch_timeout: Duration,
    pub summarize_timeout: Duration,
}

impl From<&AppConfig> for PipelineLimits {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            deadline: Duration::from_secs(p.deadline_secs.max(1)),
            max_queries: config.query_generation.max_queries.clamp(1, MAX_QUERIES_CAP),
            max_results_per_query: config.search.max_results_per_query.max(1),
            max_total_sources: p.max_total_sources.max(1),
            search_concurrency: p.search_concurrency.max(1),
            extract_concurrency: p.extract_concurrency.max(1),
            summarize_concurrency: p.summarize_concurrency.max(1),
            max_summary_bullets: p.max_summary_bullets.clamp(1, MAX_SUMMARY_BULLETS_CAP),
            search_timeout: Duration::from_secs(config.search.timeout_secs.max(1)),
            // Extraction timeout covers the request plus redirects and body read.
            fetch_timeout: Duration::from_secs(config.extraction.timeout_secs.max(1) + 5),
            summarize_timeout: Duration::from_secs(config.llm.timeout_secs.max(1) * 2),
        }
    }
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.researchbrief/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ResearchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.researchbrief/researchbrief.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ResearchError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ResearchError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ResearchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ResearchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ResearchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check values that serde cannot: URLs must parse.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    Url::parse(&config.llm.base_url).map_err(|e| {
        ResearchError::config(format!("llm.base_url '{}' is invalid: {e}", config.llm.base_url))
    })?;

    if let Some(endpoint) = &config.search.endpoint {
        Url::parse(endpoint).map_err(|e| {
            ResearchError::config(format!("search.endpoint '{endpoint}' is invalid: {e}"))
        })?;
    }

    Ok(())
}

/// Read the API key named by `var_name`, failing if it is unset or empty.
pub fn validate_api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ResearchError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}
