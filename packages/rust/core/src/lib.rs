//! Research orchestration for ResearchBrief.
//!
//! This crate ties query generation, web search, content extraction,
//! per-source summarization and cross-source synthesis into one bounded,
//! deadline-aware pipeline ([`Orchestrator`]).

pub mod pipeline;
mod pool;
pub mod query_gen;
mod similarity;
pub mod summarizer;
pub mod synthesis;

pub use pipeline::{
    DegradedItem, Orchestrator, ProgressReporter, RunDiagnostics, RunReport, SilentProgress,
    Stage, build_chat_model, build_query_generator, generate_queries,
};
pub use query_gen::{LlmQueryGenerator, QueryGenerator, TemplateQueryGenerator, finalize_queries};
pub use summarizer::{LlmSummarizer, SourceSummarizer, source_summary};
pub use synthesis::{AggregationMode, Aggregator, extractive_summary};
