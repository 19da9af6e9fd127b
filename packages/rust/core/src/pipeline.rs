//! End-to-end research pipeline: request → queries → hits → documents → summaries → brief.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at};
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use uuid::Uuid;

use researchbrief_extractor::{ContentExtractor, PageExtractor, normalize_url};
use researchbrief_llm::{ChatModel, OpenAiChatClient, UnavailableChatModel};
use researchbrief_search::{WebSearch, build_search_client};
use researchbrief_shared::{
    AppConfig, ExtractedDocument, ItemFailure, LlmConfig, PipelineLimits, ResearchError,
    ResearchRequest, ResearchResponse, Result, SearchHit, SearchQuery, SourceSummary,
};

use crate::pool::{self, EventSink};
use crate::query_gen::{LlmQueryGenerator, QueryGenerator, TemplateQueryGenerator};
use crate::summarizer::{LlmSummarizer, SourceSummarizer, source_summary};
use crate::synthesis::{AggregationMode, Aggregator};

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

/// Lifecycle of one research request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Accepted,
    Generating,
    Searching,
    Extracting,
    Summarizing,
    Aggregating,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Generating => "generating",
            Self::Searching => "searching",
            Self::Extracting => "extracting",
            Self::Summarizing => "summarizing",
            Self::Aggregating => "aggregating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// `Failed` is reachable from the fatal stages and from `Searching` when no
    /// query succeeds, either because the deadline expired first or because
    /// every search failed. A deadline later in the run skips straight to
    /// `Aggregating`.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Accepted, Generating | Failed)
                | (Generating, Searching | Failed)
                | (Searching, Extracting | Aggregating | Failed)
                | (Extracting, Summarizing | Aggregating)
                | (Summarizing, Aggregating)
                | (Aggregating, Complete)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics & progress
// ---------------------------------------------------------------------------

/// A query or URL that did not contribute to the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedItem {
    /// Query text or source URL.
    pub target: String,
    /// [`ItemFailure::kind`] label.
    pub kind: String,
    pub detail: String,
}

impl DegradedItem {
    fn new(target: impl Into<String>, failure: &ItemFailure) -> Self {
        Self {
            target: target.into(),
            kind: failure.kind().to_string(),
            detail: failure.to_string(),
        }
    }
}

/// What happened during a run, beyond the response itself.
#[derive(Debug, Clone, Serialize)]
pub struct RunDiagnostics {
    pub request_id: String,
    /// Last stage reached.
    pub stage: Stage,
    pub degraded_queries: Vec<DegradedItem>,
    pub degraded_sources: Vec<DegradedItem>,
    /// Unique URLs handed to extraction.
    pub hits_considered: usize,
    /// Sources dropped because their text matched an earlier source.
    pub duplicate_sources: usize,
    pub deadline_exceeded: bool,
}

/// Response plus diagnostics from a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub response: ResearchResponse,
    pub diagnostics: RunDiagnostics,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called on every stage transition.
    fn stage(&self, stage: Stage);
    /// Called when one query's search resolves.
    fn query_searched(&self, query: &SearchQuery, hits: usize, current: usize, total: usize);
    /// Called when one URL is finished, successfully or not.
    fn source_finished(&self, url: &str, ok: bool, current: usize, total: usize);
    /// Called when the response is assembled.
    fn done(&self, response: &ResearchResponse);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn query_searched(&self, _query: &SearchQuery, _hits: usize, _current: usize, _total: usize) {}
    fn source_finished(&self, _url: &str, _ok: bool, _current: usize, _total: usize) {}
    fn done(&self, _response: &ResearchResponse) {}
}

/// Mutable per-run bookkeeping, owned by the orchestrating task.
struct RunState<'a> {
    stage: Stage,
    diagnostics: RunDiagnostics,
    progress: &'a dyn ProgressReporter,
}

impl<'a> RunState<'a> {
    fn new(request_id: Uuid, progress: &'a dyn ProgressReporter) -> Self {
        Self {
            stage: Stage::Accepted,
            diagnostics: RunDiagnostics {
                request_id: request_id.to_string(),
                stage: Stage::Accepted,
                degraded_queries: Vec::new(),
                degraded_sources: Vec::new(),
                hits_considered: 0,
                duplicate_sources: 0,
                deadline_exceeded: false,
            },
            progress,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        debug!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
        self.diagnostics.stage = next;
        self.progress.stage(next);
    }

    fn fail(&mut self, err: ResearchError) -> ResearchError {
        warn!(stage = %self.stage, kind = err.kind(), error = %err, "request failed");
        self.advance(Stage::Failed);
        err
    }
}

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

/// The configured chat model, or a stand-in that always fails when no key is set.
pub fn build_chat_model(config: &LlmConfig) -> Arc<dyn ChatModel> {
    match OpenAiChatClient::from_config(config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "language model unavailable, model-backed stages will degrade");
            Arc::new(UnavailableChatModel::new(e.to_string()))
        }
    }
}

/// Query generator per config; `templates_only` skips the model entirely.
pub fn build_query_generator(
    config: &AppConfig,
    model: Arc<dyn ChatModel>,
    templates_only: bool,
) -> Arc<dyn QueryGenerator> {
    if templates_only {
        return Arc::new(TemplateQueryGenerator);
    }
    Arc::new(
        LlmQueryGenerator::new(model, config.llm.query_model.clone())
            .with_template_fallback(config.query_generation.fallback_to_templates),
    )
}

/// Validate `request` and produce its query list, without searching.
///
/// This is the first half of the two-step flow where queries are reviewed
/// before being passed to [`Orchestrator::run_with_queries`].
#[instrument(skip_all)]
pub async fn generate_queries(
    generator: &dyn QueryGenerator,
    request: &ResearchRequest,
    max_queries: usize,
) -> Result<Vec<SearchQuery>> {
    let request = request.validated()?;
    let queries = generator.generate(&request, max_queries.max(1)).await?;
    if queries.is_empty() {
        return Err(ResearchError::generation("no queries were generated"));
    }
    Ok(queries)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Events a per-URL unit of work reports back to the orchestrator.
enum SourceEvent {
    Extracted(std::result::Result<ExtractedDocument, ItemFailure>),
    Summarized(std::result::Result<Vec<String>, ItemFailure>),
}

type SearchOutcome = std::result::Result<Vec<SearchHit>, ItemFailure>;

/// Outcome of the search stage.
struct SearchRound {
    /// Hit lists in query order; empty for failed queries.
    per_query: Vec<Vec<SearchHit>>,
    /// Queries that finished before the deadline, successfully or not.
    resolved: usize,
    succeeded: usize,
    failures: Vec<ItemFailure>,
    deadline_hit: bool,
}

/// Fatal error for a search stage in which no query succeeded.
///
/// 504 when every query timed out or was cut off by the deadline, 502 when
/// the provider rejected at least one.
fn total_search_failure(failures: &[ItemFailure]) -> ResearchError {
    let queries = failures.len();
    let provider_error = failures
        .iter()
        .find(|f| !matches!(f, ItemFailure::SearchTimeout | ItemFailure::Cancelled));
    match provider_error {
        Some(failure) => ResearchError::Search {
            queries,
            message: failure.to_string(),
        },
        None => ResearchError::SearchTimeout { queries },
    }
}

/// Drives one research request through every stage.
///
/// Holds only immutable collaborators and limits, so one orchestrator serves
/// any number of concurrent requests.
pub struct Orchestrator {
    generator: Arc<dyn QueryGenerator>,
    search: Arc<dyn WebSearch>,
    extractor: Arc<dyn ContentExtractor>,
    summarizer: Arc<dyn SourceSummarizer>,
    aggregator: Arc<Aggregator>,
    limits: PipelineLimits,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        search: Arc<dyn WebSearch>,
        extractor: Arc<dyn ContentExtractor>,
        summarizer: Arc<dyn SourceSummarizer>,
        aggregator: Arc<Aggregator>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            generator,
            search,
            extractor,
            summarizer,
            aggregator,
            limits,
        }
    }

    /// Wire up the production collaborators.
    ///
    /// Fails when the search key is missing. A missing model key is not fatal:
    /// generation fails (or uses templates), summaries degrade per source, and
    /// synthesis falls back to the extractive summary.
    pub fn from_config(config: &AppConfig, templates_only: bool) -> Result<Self> {
        let model = build_chat_model(&config.llm);
        let search = build_search_client(&config.search)?;
        let extractor = PageExtractor::new(config.extraction.clone())?;

        Ok(Self::new(
            build_query_generator(config, model.clone(), templates_only),
            Arc::new(search),
            Arc::new(extractor),
            Arc::new(LlmSummarizer::new(
                model.clone(),
                config.llm.summary_model.clone(),
                &config.summarization,
            )),
            Arc::new(Aggregator::new(
                model,
                config.llm.synthesis_model.clone(),
                config.pipeline.max_summary_bullets,
            )),
            PipelineLimits::from(config),
        ))
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Generate queries for `request` with this orchestrator's generator.
    pub async fn generate_queries(&self, request: &ResearchRequest) -> Result<Vec<SearchQuery>> {
        generate_queries(self.generator.as_ref(), request, self.limits.max_queries).await
    }

    /// Run the full pipeline.
    pub async fn run(&self, request: &ResearchRequest) -> Result<ResearchResponse> {
        self.execute(request, None, &SilentProgress)
            .await
            .map(|report| report.response)
    }

    /// Run with pre-approved queries, skipping generation.
    pub async fn run_with_queries(
        &self,
        request: &ResearchRequest,
        queries: Vec<SearchQuery>,
    ) -> Result<ResearchResponse> {
        self.execute(request, Some(queries), &SilentProgress)
            .await
            .map(|report| report.response)
    }

    /// Run the pipeline, reporting progress and returning diagnostics.
    ///
    /// `approved` replaces query generation when given.
    pub async fn execute(
        &self,
        request: &ResearchRequest,
        approved: Option<Vec<SearchQuery>>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let request_id = Uuid::now_v7();
        let span = info_span!("research", %request_id);
        self.execute_inner(request, approved, progress, request_id)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        request: &ResearchRequest,
        approved: Option<Vec<SearchQuery>>,
        progress: &dyn ProgressReporter,
        request_id: Uuid,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.limits.deadline;
        let mut run = RunState::new(request_id, progress);

        // --- Accepted ---
        let request = request.validated().map_err(|e| run.fail(e))?;
        info!(
            subject = %request.subject,
            jurisdiction = request.jurisdiction.as_deref().unwrap_or("-"),
            "research request accepted"
        );

        // --- Generating ---
        run.advance(Stage::Generating);
        let queries = match approved {
            Some(queries) => approved_queries(queries, self.limits.max_queries),
            None => match timeout_at(
                deadline,
                self.generator.generate(&request, self.limits.max_queries),
            )
            .await
            {
                Ok(result) => result.map_err(|e| run.fail(e))?,
                Err(_) => {
                    return Err(run.fail(ResearchError::PipelineTimeout {
                        elapsed_ms: started.elapsed().as_millis(),
                    }));
                }
            },
        };
        if queries.is_empty() {
            return Err(run.fail(ResearchError::generation("no queries were generated")));
        }

        // --- Searching ---
        run.advance(Stage::Searching);
        let searched = self.search_all(&queries, deadline, &mut run).await;
        let search_deadline_hit = searched.deadline_hit;

        if search_deadline_hit && searched.resolved == 0 {
            return Err(run.fail(ResearchError::PipelineTimeout {
                elapsed_ms: started.elapsed().as_millis(),
            }));
        }
        if searched.succeeded == 0 {
            return Err(run.fail(total_search_failure(&searched.failures)));
        }

        let hits = merge_hits(searched.per_query, self.limits.max_total_sources);
        run.diagnostics.hits_considered = hits.len();
        info!(
            queries = queries.len(),
            failed = run.diagnostics.degraded_queries.len(),
            urls = hits.len(),
            "search stage finished"
        );

        // --- Extracting / Summarizing ---
        let sources = if search_deadline_hit {
            run.diagnostics.deadline_exceeded = true;
            Vec::new()
        } else {
            run.advance(Stage::Extracting);
            let sources = self.extract_and_summarize(&hits, deadline, &mut run).await;
            info!(
                sources = sources.len(),
                failed = run.diagnostics.degraded_sources.len(),
                duplicates = run.diagnostics.duplicate_sources,
                "source stage finished"
            );
            sources
        };

        // --- Aggregating ---
        run.advance(Stage::Aggregating);
        let summary = if run.diagnostics.deadline_exceeded {
            self.aggregator
                .aggregate(&request, &sources, AggregationMode::Extractive)
                .await
        } else {
            match timeout_at(
                deadline,
                self.aggregator
                    .aggregate(&request, &sources, AggregationMode::Synthesize),
            )
            .await
            {
                Ok(summary) => summary,
                Err(_) => {
                    warn!("deadline reached during synthesis, using extractive summary");
                    run.diagnostics.deadline_exceeded = true;
                    self.aggregator
                        .aggregate(&request, &sources, AggregationMode::Extractive)
                        .await
                }
            }
        };

        // --- Complete ---
        run.advance(Stage::Complete);
        let response = ResearchResponse {
            queries,
            summary,
            sources,
            processing_time: started.elapsed().as_secs_f64(),
        };

        info!(
            sources = response.sources.len(),
            bullets = response.summary.len(),
            deadline_exceeded = run.diagnostics.deadline_exceeded,
            elapsed_s = response.processing_time,
            "research complete"
        );
        progress.done(&response);

        Ok(RunReport {
            response,
            diagnostics: run.diagnostics,
        })
    }

    /// Run every query's search with bounded concurrency.
    ///
    /// Failed and unresolved queries are recorded as degraded and contribute
    /// an empty hit list.
    async fn search_all(
        &self,
        queries: &[SearchQuery],
        deadline: tokio::time::Instant,
        run: &mut RunState<'_>,
    ) -> SearchRound {
        let total = queries.len();
        let search = self.search.clone();
        let shared: Arc<[SearchQuery]> = queries.into();
        let max_results = self.limits.max_results_per_query;
        let per_call = self.limits.search_timeout;

        let mut fan = pool::fan_out(
            total,
            self.limits.search_concurrency,
            move |index, sink: EventSink<SearchOutcome>| {
                let search = search.clone();
                let queries = shared.clone();
                async move {
                    let outcome = timeout(per_call, search.search(&queries[index], max_results))
                        .await
                        .unwrap_or(Err(ItemFailure::SearchTimeout));
                    sink.emit(outcome);
                }
            },
        );

        let mut slots: Vec<Option<SearchOutcome>> = (0..total).map(|_| None).collect();
        let mut resolved = 0;

        let deadline_hit = loop {
            match timeout_at(deadline, fan.next()).await {
                Ok(Some((index, outcome))) => {
                    resolved += 1;
                    let hits = outcome.as_ref().map_or(0, Vec::len);
                    run.progress
                        .query_searched(&queries[index], hits, resolved, total);
                    slots[index] = Some(outcome);
                }
                Ok(None) => break false,
                Err(_) => {
                    warn!(resolved, total, "deadline reached during search");
                    break true;
                }
            }
        };
        drop(fan);

        let mut round = SearchRound {
            per_query: Vec::with_capacity(total),
            resolved,
            succeeded: 0,
            failures: Vec::new(),
            deadline_hit,
        };
        for (query, slot) in queries.iter().zip(slots) {
            match slot.unwrap_or(Err(ItemFailure::Cancelled)) {
                Ok(mut hits) => {
                    debug!(query = %query.query, hits = hits.len(), "query searched");
                    hits.truncate(max_results);
                    round.succeeded += 1;
                    round.per_query.push(hits);
                }
                Err(failure) => {
                    warn!(query = %query.query, kind = failure.kind(), error = %failure, "query failed");
                    run.diagnostics
                        .degraded_queries
                        .push(DegradedItem::new(query.query.clone(), &failure));
                    round.failures.push(failure);
                    round.per_query.push(Vec::new());
                }
            }
        }

        round
    }

    /// Extract and summarize every hit, pipelined per URL.
    ///
    /// Each unit extracts under the extraction gate and then summarizes under
    /// the summarization gate, so a document's summary starts as soon as its
    /// text is ready. Sources come back in hit order.
    async fn extract_and_summarize(
        &self,
        hits: &[SearchHit],
        deadline: tokio::time::Instant,
        run: &mut RunState<'_>,
    ) -> Vec<SourceSummary> {
        let total = hits.len();
        let urls: Arc<[String]> = hits.iter().map(|h| h.url.clone()).collect();

        let extractor = self.extractor.clone();
        let summarizer = self.summarizer.clone();
        let extract_gate = Arc::new(Semaphore::new(self.limits.extract_concurrency.max(1)));
        let summarize_gate = Arc::new(Semaphore::new(self.limits.summarize_concurrency.max(1)));
        let fetch_timeout = self.limits.fetch_timeout;
        let summarize_timeout = self.limits.summarize_timeout;
        let workers = self.limits.extract_concurrency + self.limits.summarize_concurrency;

        let unit_urls = urls.clone();
        let mut fan = pool::fan_out(total, workers, move |index, sink: EventSink<SourceEvent>| {
            let extractor = extractor.clone();
            let summarizer = summarizer.clone();
            let extract_gate = extract_gate.clone();
            let summarize_gate = summarize_gate.clone();
            let urls = unit_urls.clone();
            async move {
                let extracted = {
                    let Ok(_permit) = extract_gate.acquire().await else {
                        return;
                    };
                    timeout(fetch_timeout, extractor.extract(&urls[index]))
                        .await
                        .unwrap_or(Err(ItemFailure::FetchTimeout))
                };

                let document = match extracted {
                    Ok(document) => document,
                    Err(failure) => {
                        sink.emit(SourceEvent::Extracted(Err(failure)));
                        return;
                    }
                };
                if !sink.emit(SourceEvent::Extracted(Ok(document.clone()))) {
                    return;
                }

                let summarized = {
                    let Ok(_permit) = summarize_gate.acquire().await else {
                        return;
                    };
                    timeout(summarize_timeout, summarizer.summarize(&document))
                        .await
                        .unwrap_or_else(|_| {
                            Err(ItemFailure::Summarization("timed out".into()))
                        })
                };
                sink.emit(SourceEvent::Summarized(summarized));
            }
        });

        let mut extracted: Vec<Option<std::result::Result<ExtractedDocument, ItemFailure>>> =
            (0..total).map(|_| None).collect();
        let mut summarized: Vec<Option<std::result::Result<Vec<String>, ItemFailure>>> =
            (0..total).map(|_| None).collect();
        let mut pending_extractions = total;
        let mut pending_summaries = 0usize;
        let mut finished = 0;

        let deadline_hit = loop {
            if pending_extractions == 0 && run.stage == Stage::Extracting {
                run.advance(Stage::Summarizing);
            }
            if pending_extractions == 0 && pending_summaries == 0 {
                break false;
            }

            match timeout_at(deadline, fan.next()).await {
                Ok(Some((index, SourceEvent::Extracted(result)))) => {
                    pending_extractions -= 1;
                    if result.is_ok() {
                        pending_summaries += 1;
                    } else {
                        finished += 1;
                        run.progress
                            .source_finished(&urls[index], false, finished, total);
                    }
                    extracted[index] = Some(result);
                }
                Ok(Some((index, SourceEvent::Summarized(result)))) => {
                    pending_summaries -= 1;
                    finished += 1;
                    run.progress
                        .source_finished(&urls[index], result.is_ok(), finished, total);
                    summarized[index] = Some(result);
                }
                Ok(None) => break false,
                Err(_) => {
                    warn!(
                        stage = %run.stage,
                        pending_extractions,
                        pending_summaries,
                        "deadline reached, cancelling in-flight sources"
                    );
                    break true;
                }
            }
        };
        drop(fan);

        if deadline_hit {
            run.diagnostics.deadline_exceeded = true;
        }

        let mut seen_hashes = HashSet::new();
        let mut sources = Vec::new();

        for (index, url) in urls.iter().enumerate() {
            match (extracted[index].take(), summarized[index].take()) {
                (Some(Ok(document)), Some(Ok(bullets))) => {
                    if !seen_hashes.insert(document.content_hash.clone()) {
                        debug!(%url, "dropping source with duplicate content");
                        run.diagnostics.duplicate_sources += 1;
                        continue;
                    }
                    sources.push(source_summary(&document, bullets));
                }
                (Some(Ok(_)), Some(Err(failure))) | (Some(Err(failure)), _) => {
                    warn!(%url, kind = failure.kind(), error = %failure, "source dropped");
                    run.diagnostics
                        .degraded_sources
                        .push(DegradedItem::new(url.clone(), &failure));
                }
                (Some(Ok(_)), None) | (None, _) => {
                    run.diagnostics
                        .degraded_sources
                        .push(DegradedItem::new(url.clone(), &ItemFailure::Cancelled));
                }
            }
        }

        sources
    }
}

/// Clean up user-approved queries without rewriting them.
fn approved_queries(queries: Vec<SearchQuery>, max_queries: usize) -> Vec<SearchQuery> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter_map(|q| {
            let text = q.query.split_whitespace().collect::<Vec<_>>().join(" ");
            (!text.is_empty() && seen.insert(text.to_lowercase()))
                .then(|| SearchQuery::new(text, q.category))
        })
        .take(max_queries.max(1))
        .collect()
}

/// Interleave per-query hits by rank and drop repeated URLs.
///
/// Rank 1 of every query comes first (in query order), then rank 2, and so on,
/// so each query contributes its best hits before any query's weaker ones.
/// The first occurrence of a URL wins. At most `cap` hits are kept.
fn merge_hits(per_query: Vec<Vec<SearchHit>>, cap: usize) -> Vec<SearchHit> {
    let depth = per_query.iter().map(Vec::len).max().unwrap_or(0);
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    'outer: for rank in 0..depth {
        for (query_index, hits) in per_query.iter().enumerate() {
            let Some(hit) = hits.get(rank) else {
                continue;
            };
            if !seen.insert(normalize_url(&hit.url)) {
                continue;
            }
            merged.push(SearchHit {
                query_index,
                ..hit.clone()
            });
            if merged.len() >= cap {
                break 'outer;
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use researchbrief_shared::{ExtractionStatus, QueryCategory};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // --- Mocks ---

    struct FixedGenerator {
        queries: Vec<SearchQuery>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedGenerator {
        fn new(queries: &[&str]) -> Arc<Self> {
            Self::slow(queries, Duration::ZERO)
        }

        fn slow(queries: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                queries: queries
                    .iter()
                    .zip(QueryCategory::ALL.iter().cycle())
                    .map(|(q, c)| SearchQuery::new(*q, *c))
                    .collect(),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryGenerator for FixedGenerator {
        async fn generate(
            &self,
            _request: &ResearchRequest,
            max_queries: usize,
        ) -> Result<Vec<SearchQuery>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.queries.iter().take(max_queries).cloned().collect())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl QueryGenerator for FailingGenerator {
        async fn generate(&self, _: &ResearchRequest, _: usize) -> Result<Vec<SearchQuery>> {
            Err(ResearchError::generation("model returned no usable queries"))
        }
    }

    /// Canned per-query outcomes after a fixed delay; tracks peak concurrency.
    #[derive(Default)]
    struct MockSearch {
        results: HashMap<String, SearchOutcome>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockSearch {
        fn with(mut self, query: &str, urls: &[&str]) -> Self {
            let hits = urls
                .iter()
                .enumerate()
                .map(|(i, url)| SearchHit {
                    url: url.to_string(),
                    title: format!("Result {i}"),
                    domain: host(url),
                    snippet: String::new(),
                    rank: i + 1,
                    query_index: 0,
                })
                .collect();
            self.results.insert(query.to_string(), Ok(hits));
            self
        }

        fn failing(mut self, query: &str) -> Self {
            self.results.insert(
                query.to_string(),
                Err(ItemFailure::SearchProvider("HTTP 500".into())),
            );
            self
        }
    }

    #[async_trait]
    impl WebSearch for MockSearch {
        async fn search(
            &self,
            query: &SearchQuery,
            max_results: usize,
        ) -> std::result::Result<Vec<SearchHit>, ItemFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.results
                .get(&query.query)
                .cloned()
                .unwrap_or(Ok(Vec::new()))
                .map(|mut hits| {
                    hits.truncate(max_results);
                    hits
                })
        }
    }

    /// Extracts every URL after a per-URL delay; tracks peak concurrency.
    #[derive(Default)]
    struct MockExtractor {
        failures: HashMap<String, ItemFailure>,
        delays: HashMap<String, Duration>,
        text_overrides: HashMap<String, String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockExtractor {
        fn fail(mut self, url: &str, failure: ItemFailure) -> Self {
            self.failures.insert(url.to_string(), failure);
            self
        }

        fn delay(mut self, url: &str, delay: Duration) -> Self {
            self.delays.insert(url.to_string(), delay);
            self
        }

        fn text(mut self, url: &str, text: &str) -> Self {
            self.text_overrides.insert(url.to_string(), text.to_string());
            self
        }
    }

    fn host(url: &str) -> String {
        url.split('/').nth(2).unwrap_or_default().to_string()
    }

    fn fixed_date() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[async_trait]
    impl ContentExtractor for MockExtractor {
        async fn extract(&self, url: &str) -> std::result::Result<ExtractedDocument, ItemFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self
                .delays
                .get(url)
                .copied()
                .unwrap_or(Duration::from_millis(5));
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(failure) = self.failures.get(url) {
                return Err(failure.clone());
            }
            let domain = host(url);
            let text = self
                .text_overrides
                .get(url)
                .cloned()
                .unwrap_or_else(|| format!("Findings published at {url} about housing."));
            Ok(ExtractedDocument {
                url: url.to_string(),
                domain,
                title: None,
                content_hash: researchbrief_extractor::compute_hash(&text),
                byte_length: text.len(),
                text,
                status: ExtractionStatus::Complete,
                date_accessed: fixed_date(),
            })
        }
    }

    /// One bullet naming the document's URL; tracks peak concurrency.
    #[derive(Default)]
    struct MockSummarizer {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SourceSummarizer for MockSummarizer {
        async fn summarize(
            &self,
            document: &ExtractedDocument,
        ) -> std::result::Result<Vec<String>, ItemFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![format!("Claim {}", document.url)])
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        stages: Mutex<Vec<Stage>>,
        finished: AtomicUsize,
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }
        fn query_searched(&self, _: &SearchQuery, _: usize, _: usize, _: usize) {}
        fn source_finished(&self, _: &str, _: bool, _: usize, _: usize) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _: &ResearchResponse) {}
    }

    // --- Fixtures ---

    fn ontario() -> ResearchRequest {
        ResearchRequest::new("Housing affordability", "policy briefing", Some("Ontario".into()))
    }

    fn limits() -> PipelineLimits {
        PipelineLimits {
            deadline: Duration::from_secs(5),
            ..PipelineLimits::default()
        }
    }

    fn orchestrator(
        generator: Arc<dyn QueryGenerator>,
        search: MockSearch,
        extractor: Arc<MockExtractor>,
        summarizer: Arc<MockSummarizer>,
        limits: PipelineLimits,
    ) -> Orchestrator {
        Orchestrator::new(
            generator,
            Arc::new(search),
            extractor,
            summarizer,
            Arc::new(Aggregator::extractive_only(7)),
            limits,
        )
    }

    /// Three queries, two hits each, one URL shared by two queries.
    fn housing_search() -> MockSearch {
        MockSearch::default()
            .with("q1", &["https://a.example/1", "https://b.example/2"])
            .with("q2", &["https://b.example/2", "https://c.example/3"])
            .with("q3", &["https://d.example/4", "https://e.example/5"])
    }

    fn urls(response: &ResearchResponse) -> Vec<&str> {
        response.sources.iter().map(|s| s.url.as_str()).collect()
    }

    // --- Stage machine ---

    #[test]
    fn transitions_follow_the_lifecycle() {
        use Stage::*;
        let happy = [
            Accepted,
            Generating,
            Searching,
            Extracting,
            Summarizing,
            Aggregating,
            Complete,
        ];
        for pair in happy.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }

        assert!(Accepted.can_transition_to(Failed));
        assert!(Generating.can_transition_to(Failed));
        assert!(Searching.can_transition_to(Failed));
        assert!(Extracting.can_transition_to(Aggregating));
        assert!(!Extracting.can_transition_to(Failed));
        assert!(!Summarizing.can_transition_to(Failed));
        assert!(!Complete.can_transition_to(Aggregating));
        assert!(!Accepted.can_transition_to(Searching));
        assert!(Complete.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn merge_interleaves_by_rank_and_dedups() {
        let hit = |url: &str, rank| SearchHit {
            url: url.into(),
            title: String::new(),
            domain: String::new(),
            snippet: String::new(),
            rank,
            query_index: 0,
        };
        let merged = merge_hits(
            vec![
                vec![hit("https://a.example/x", 1), hit("https://b.example/y", 2)],
                vec![hit("https://b.example/y/", 1), hit("https://c.example/z", 2)],
            ],
            10,
        );
        let got: Vec<(&str, usize)> = merged
            .iter()
            .map(|h| (h.url.as_str(), h.query_index))
            .collect();
        assert_eq!(
            got,
            vec![
                ("https://a.example/x", 0),
                ("https://b.example/y/", 1),
                ("https://c.example/z", 1),
            ]
        );

        let capped = merge_hits(vec![vec![hit("https://a.example/x", 1)], vec![hit("https://c.example/z", 1)]], 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn approved_queries_are_cleaned_not_rewritten() {
        let queries = approved_queries(
            vec![
                SearchQuery::new("  housing   starts ", QueryCategory::Statistics),
                SearchQuery::new("", QueryCategory::News),
                SearchQuery::new("Housing starts", QueryCategory::News),
                SearchQuery::new("rent control", QueryCategory::Policy),
            ],
            5,
        );
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].query, "housing starts");
        assert_eq!(queries[1].category, QueryCategory::Policy);
    }

    // --- End to end ---

    #[tokio::test]
    async fn housing_scenario_isolates_failures() {
        let extractor = Arc::new(
            MockExtractor::default().fail("https://c.example/3", ItemFailure::FetchHttp { status: 404 }),
        );
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            housing_search(),
            extractor,
            Arc::new(MockSummarizer::default()),
            limits(),
        );
        let progress = RecordingProgress::default();

        let report = orch.execute(&ontario(), None, &progress).await.unwrap();
        let response = &report.response;

        assert_eq!(response.queries.len(), 3);
        assert_eq!(
            urls(response),
            vec![
                "https://a.example/1",
                "https://b.example/2",
                "https://d.example/4",
                "https://e.example/5",
            ]
        );
        assert!(!response.summary.is_empty() && response.summary.len() <= 10);
        assert!(response.processing_time >= 0.0);

        let diag = &report.diagnostics;
        assert_eq!(diag.hits_considered, 5);
        assert_eq!(diag.degraded_sources.len(), 1);
        assert_eq!(diag.degraded_sources[0].kind, "fetch_http_error");
        assert_eq!(diag.stage, Stage::Complete);
        assert!(!diag.deadline_exceeded);

        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![
                Stage::Generating,
                Stage::Searching,
                Stage::Extracting,
                Stage::Summarizing,
                Stage::Aggregating,
                Stage::Complete,
            ]
        );
        assert_eq!(progress.finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn sources_follow_hit_order_not_completion_order() {
        // First hit finishes last.
        let extractor = Arc::new(
            MockExtractor::default().delay("https://a.example/1", Duration::from_millis(80)),
        );
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            housing_search(),
            extractor,
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let response = orch.run(&ontario()).await.unwrap();
        assert_eq!(urls(&response)[0], "https://a.example/1");
        assert_eq!(response.sources.len(), 5);
    }

    #[tokio::test]
    async fn identical_collaborators_give_identical_responses() {
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let first = orch.run(&ontario()).await.unwrap();
        let second = orch.run(&ontario()).await.unwrap();
        assert_eq!(first.queries, second.queries);
        assert_eq!(first.sources, second.sources);
        assert_eq!(first.summary, second.summary);
    }

    #[tokio::test]
    async fn deadline_mid_extraction_keeps_finished_sources() {
        let search = MockSearch::default().with(
            "q1",
            &[
                "https://a.example/1",
                "https://b.example/2",
                "https://c.example/3",
                "https://d.example/4",
                "https://e.example/5",
            ],
        );
        let slow = Duration::from_secs(5);
        let extractor = Arc::new(
            MockExtractor::default()
                .delay("https://c.example/3", slow)
                .delay("https://d.example/4", slow)
                .delay("https://e.example/5", slow),
        );
        let orch = orchestrator(
            FixedGenerator::new(&["q1"]),
            search,
            extractor,
            Arc::new(MockSummarizer::default()),
            PipelineLimits {
                deadline: Duration::from_millis(400),
                ..PipelineLimits::default()
            },
        );

        let started = Instant::now();
        let report = orch.execute(&ontario(), None, &SilentProgress).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));

        assert_eq!(
            urls(&report.response),
            vec!["https://a.example/1", "https://b.example/2"]
        );
        let diag = &report.diagnostics;
        assert!(diag.deadline_exceeded);
        assert_eq!(diag.stage, Stage::Complete);
        assert_eq!(diag.degraded_sources.len(), 3);
        assert!(diag.degraded_sources.iter().all(|d| d.kind == "cancelled"));
    }

    #[tokio::test]
    async fn deadline_during_generation_is_pipeline_timeout() {
        let orch = orchestrator(
            FixedGenerator::slow(&["q1"], Duration::from_secs(5)),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            PipelineLimits {
                deadline: Duration::from_millis(100),
                ..PipelineLimits::default()
            },
        );

        let err = orch.run(&ontario()).await.unwrap_err();
        assert_eq!(err.status_code(), 504);
        assert_eq!(err.kind(), "pipeline_timeout");
    }

    #[tokio::test]
    async fn deadline_before_any_search_is_pipeline_timeout() {
        let search = MockSearch {
            delay: Duration::from_secs(5),
            ..MockSearch::default()
        };
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2"]),
            search,
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            PipelineLimits {
                deadline: Duration::from_millis(100),
                ..PipelineLimits::default()
            },
        );

        let progress = RecordingProgress::default();
        let err = orch.execute(&ontario(), None, &progress).await.unwrap_err();
        assert_eq!(err.status_code(), 504);
        assert_eq!(progress.stages.lock().unwrap().last(), Some(&Stage::Failed));
    }

    #[tokio::test]
    async fn invalid_request_fails_before_generation() {
        let generator = FixedGenerator::new(&["q1"]);
        let orch = orchestrator(
            generator.clone(),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let err = orch
            .run(&ResearchRequest::new("   ", "briefing", None))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generation_failure_is_fatal() {
        let orch = orchestrator(
            Arc::new(FailingGenerator),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );
        let err = orch.run(&ontario()).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn all_searches_failing_is_upstream_error() {
        let search = MockSearch::default().failing("q1").failing("q2");
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2"]),
            search,
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );
        let progress = RecordingProgress::default();

        let err = orch
            .execute(&ontario(), None, &progress)
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Search { queries: 2, .. }), "{err}");
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("HTTP 500"));

        let stages = progress.stages.lock().unwrap();
        assert_eq!(stages.last(), Some(&Stage::Failed));
        assert!(!stages.contains(&Stage::Extracting));
    }

    #[tokio::test]
    async fn all_searches_timing_out_is_gateway_timeout() {
        let search = MockSearch {
            delay: Duration::from_secs(5),
            ..MockSearch::default()
        }
        .with("q1", &["https://a.example/1"])
        .with("q2", &["https://b.example/2"]);
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2"]),
            search,
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            PipelineLimits {
                deadline: Duration::from_secs(10),
                search_timeout: Duration::from_millis(100),
                ..limits()
            },
        );

        let started = Instant::now();
        let err = orch
            .run_with_queries(&ontario(), vec![
                SearchQuery::new("q1", QueryCategory::ALL[0]),
                SearchQuery::new("q2", QueryCategory::ALL[1]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::SearchTimeout { queries: 2 }), "{err}");
        assert_eq!(err.status_code(), 504);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn searches_without_hits_give_empty_response() {
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2"]),
            MockSearch::default(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let report = orch.execute(&ontario(), None, &SilentProgress).await.unwrap();
        assert_eq!(report.response.queries.len(), 2);
        assert!(report.response.sources.is_empty());
        assert!(report.response.summary.is_empty());
        assert!(report.diagnostics.degraded_queries.is_empty());
        assert_eq!(report.diagnostics.stage, Stage::Complete);
    }

    #[test]
    fn mixed_search_failures_report_provider_error() {
        let err = total_search_failure(&[
            ItemFailure::SearchTimeout,
            ItemFailure::SearchProvider("HTTP 429".into()),
            ItemFailure::Cancelled,
        ]);
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("HTTP 429"));

        let err = total_search_failure(&[ItemFailure::SearchTimeout, ItemFailure::Cancelled]);
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn one_failed_query_does_not_affect_others() {
        let search = MockSearch::default()
            .with("q1", &["https://a.example/1"])
            .failing("q2")
            .with("q3", &["https://d.example/4"]);
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            search,
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let response = orch.run(&ontario()).await.unwrap();
        assert_eq!(
            urls(&response),
            vec!["https://a.example/1", "https://d.example/4"]
        );
    }

    #[tokio::test]
    async fn duplicate_content_keeps_first_source() {
        let search = MockSearch::default().with(
            "q1",
            &["https://a.example/1", "https://mirror.example/1", "https://c.example/3"],
        );
        let same = "Ontario announced a housing plan with new targets.";
        let extractor = Arc::new(
            MockExtractor::default()
                .text("https://a.example/1", same)
                .text("https://mirror.example/1", same),
        );
        let orch = orchestrator(
            FixedGenerator::new(&["q1"]),
            search,
            extractor,
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let report = orch.execute(&ontario(), None, &SilentProgress).await.unwrap();
        assert_eq!(
            urls(&report.response),
            vec!["https://a.example/1", "https://c.example/3"]
        );
        assert_eq!(report.diagnostics.duplicate_sources, 1);
    }

    #[tokio::test]
    async fn stage_caps_bound_in_flight_work() {
        let search = MockSearch::default()
            .with("q1", &["https://a.example/1", "https://a.example/2", "https://a.example/3"])
            .with("q2", &["https://b.example/1", "https://b.example/2", "https://b.example/3"])
            .with("q3", &["https://c.example/1", "https://c.example/2", "https://c.example/3"]);
        let mut extractor = MockExtractor::default();
        for host in ["a", "b", "c"] {
            for n in 1..=3 {
                extractor = extractor.delay(
                    &format!("https://{host}.example/{n}"),
                    Duration::from_millis(20),
                );
            }
        }
        let extractor = Arc::new(extractor);
        let summarizer = Arc::new(MockSummarizer {
            delay: Duration::from_millis(20),
            ..MockSummarizer::default()
        });

        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            search,
            extractor.clone(),
            summarizer.clone(),
            PipelineLimits {
                extract_concurrency: 2,
                summarize_concurrency: 1,
                ..limits()
            },
        );

        let response = orch.run(&ontario()).await.unwrap();
        assert_eq!(response.sources.len(), 9);
        assert!(extractor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(summarizer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_cap_bounds_in_flight_queries() {
        let mut search = MockSearch {
            delay: Duration::from_millis(20),
            ..MockSearch::default()
        };
        let names: Vec<String> = (1..=6).map(|n| format!("q{n}")).collect();
        for (n, name) in names.iter().enumerate() {
            search = search.with(name, &[format!("https://s{n}.example/page").as_str()]);
        }
        let search = Arc::new(search);
        let queries: Vec<&str> = names.iter().map(String::as_str).collect();

        let orch = Orchestrator::new(
            FixedGenerator::new(&queries),
            search.clone(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            Arc::new(Aggregator::extractive_only(7)),
            PipelineLimits {
                max_queries: 6,
                search_concurrency: 2,
                ..limits()
            },
        );

        let response = orch.run(&ontario()).await.unwrap();
        assert_eq!(response.queries.len(), 6);
        assert_eq!(response.sources.len(), 6);
        let peak = search.peak.load(Ordering::SeqCst);
        assert!(peak > 0 && peak <= 2, "peak {peak}");
    }

    #[tokio::test]
    async fn total_sources_are_capped() {
        let orch = orchestrator(
            FixedGenerator::new(&["q1", "q2", "q3"]),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            PipelineLimits {
                max_total_sources: 2,
                ..limits()
            },
        );
        let response = orch.run(&ontario()).await.unwrap();
        assert_eq!(
            urls(&response),
            vec!["https://a.example/1", "https://b.example/2"]
        );
    }

    #[tokio::test]
    async fn approved_queries_skip_generation() {
        let generator = FixedGenerator::new(&["unused"]);
        let orch = orchestrator(
            generator.clone(),
            housing_search(),
            Arc::new(MockExtractor::default()),
            Arc::new(MockSummarizer::default()),
            limits(),
        );

        let response = orch
            .run_with_queries(
                &ontario(),
                vec![SearchQuery::new("q3", QueryCategory::Statistics)],
            )
            .await
            .unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(response.queries[0].query, "q3");
        assert_eq!(response.sources.len(), 2);
    }

    #[tokio::test]
    async fn generate_queries_validates_first() {
        let generator = FixedGenerator::new(&["q1", "q2"]);
        let err = generate_queries(generator.as_ref(), &ResearchRequest::new("x", " ", None), 5)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let queries = generate_queries(generator.as_ref(), &ontario(), 1).await.unwrap();
        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn diagnostics_serialize_with_snake_case_stage() {
        let mut run = RunState::new(Uuid::now_v7(), &SilentProgress);
        run.advance(Stage::Generating);
        let value = serde_json::to_value(&run.diagnostics).unwrap();
        assert_eq!(value["stage"], "generating");
        assert!(value["degraded_sources"].as_array().unwrap().is_empty());
    }
}
