//! Shared types, error model, and configuration for ResearchBrief.
//!
//! This crate is the foundation depended on by all other ResearchBrief crates.
//! It provides:
//! - [`ResearchError`] and [`ItemFailure`]: fatal and per-item error types
//! - Domain types ([`ResearchRequest`], [`SearchQuery`], [`SourceSummary`], [`ResearchResponse`])
//! - Configuration ([`AppConfig`], [`PipelineLimits`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExtractionConfig, LlmConfig, PipelineConfig, PipelineLimits,
    QueryGenerationConfig, SearchConfig, SearchProviderKind, SummarizationConfig,
    MAX_QUERIES_CAP, MAX_SOURCE_BULLETS_CAP, MAX_SUMMARY_BULLETS_CAP, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
    validate_config,
};
pub use error::{ErrorBody, ItemFailure, ResearchError, Result};
pub use types::{
    ExtractedDocument, ExtractionStatus, QueryCategory, ResearchRequest, ResearchResponse,
    SearchHit, SearchQuery, SourceSummary,
};
