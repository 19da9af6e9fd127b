//! Cross-source synthesis of the per-source bullets.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use researchbrief_llm::{ChatModel, ChatRequest, parse_bullets};
use researchbrief_shared::{MAX_SUMMARY_BULLETS_CAP, ResearchRequest, SourceSummary};

use crate::similarity::{drop_near_duplicates, jaccard, tokens};

/// Bullets this similar are treated as the same claim when clustering.
const CLUSTER_THRESHOLD: f64 = 0.5;

/// Synthesized bullets this similar are collapsed.
const DUPLICATE_THRESHOLD: f64 = 0.8;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a senior policy analyst writing executive-level \
summaries for government document drafters. You only restate claims present in the findings \
you are given.";

/// How the aggregator may produce the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Ask the chat model, falling back to extractive on failure.
    Synthesize,
    /// Corroboration ranking only, no external calls.
    Extractive,
}

/// Merges every source's bullets into the final key findings.
pub struct Aggregator {
    model: Option<Arc<dyn ChatModel>>,
    model_name: String,
    max_bullets: usize,
}

impl Aggregator {
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>, max_bullets: usize) -> Self {
        Self {
            model: Some(model),
            model_name: model_name.into(),
            max_bullets: max_bullets.clamp(1, MAX_SUMMARY_BULLETS_CAP),
        }
    }

    /// Aggregator that never calls a model.
    pub fn extractive_only(max_bullets: usize) -> Self {
        Self {
            model: None,
            model_name: String::new(),
            max_bullets: max_bullets.clamp(1, MAX_SUMMARY_BULLETS_CAP),
        }
    }

    /// Summarize `sources`. Zero sources yield an empty summary.
    pub async fn aggregate(
        &self,
        request: &ResearchRequest,
        sources: &[SourceSummary],
        mode: AggregationMode,
    ) -> Vec<String> {
        if sources.is_empty() {
            return Vec::new();
        }

        let model = match (mode, &self.model) {
            (AggregationMode::Synthesize, Some(model)) => model,
            _ => return extractive_summary(sources, self.max_bullets),
        };

        match self.synthesize(model.as_ref(), request, sources).await {
            Some(bullets) => {
                info!(bullets = bullets.len(), sources = sources.len(), "synthesized summary");
                bullets
            }
            None => extractive_summary(sources, self.max_bullets),
        }
    }

    async fn synthesize(
        &self,
        model: &dyn ChatModel,
        request: &ResearchRequest,
        sources: &[SourceSummary],
    ) -> Option<Vec<String>> {
        let findings = sources
            .iter()
            .flat_map(|s| s.source_summary.iter().map(move |b| format!("[{}] {b}", s.domain)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Create a unified synthesis for a government document on the following:\n\
             - Subject: {subject}\n\
             - Purpose: {purpose}\n\n\
             Research findings, each tagged with its source domain:\n\n\
             {findings}\n\n\
             Write at most {max} bullet points that group related findings, put first the claims \
             supported by several different domains, and keep specific facts and figures. Use \
             only claims listed above; do not add new facts.\n\n\
             Return only the bullet points, starting each with \"•\".",
            subject = request.subject,
            purpose = request.purpose,
            max = self.max_bullets,
        );

        let reply = match model
            .complete(
                ChatRequest::prompt(&self.model_name, SYNTHESIS_SYSTEM_PROMPT, prompt)
                    .temperature(0.4)
                    .max_tokens(600),
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "synthesis failed, using extractive summary");
                return None;
            }
        };

        let mut bullets = drop_near_duplicates(parse_bullets(&reply), DUPLICATE_THRESHOLD);
        bullets.truncate(self.max_bullets);
        if bullets.is_empty() {
            warn!("synthesis returned no bullets, using extractive summary");
            return None;
        }
        Some(bullets)
    }
}

/// A group of bullets stating the same claim.
struct Cluster {
    representative: String,
    tokens: HashSet<String>,
    domains: HashSet<String>,
    first_seen: usize,
}

/// Rank claims by how many distinct domains state them, without any model.
///
/// Each cluster is represented by its first-seen bullet, emitted verbatim.
/// Ties keep first-appearance order, so identical input gives identical output.
pub fn extractive_summary(sources: &[SourceSummary], max_bullets: usize) -> Vec<String> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut position = 0;

    for source in sources {
        for bullet in &source.source_summary {
            let toks = tokens(bullet);
            match clusters
                .iter_mut()
                .find(|c| jaccard(&c.tokens, &toks) >= CLUSTER_THRESHOLD)
            {
                Some(cluster) => {
                    cluster.domains.insert(source.domain.clone());
                }
                None => clusters.push(Cluster {
                    representative: bullet.clone(),
                    tokens: toks,
                    domains: HashSet::from([source.domain.clone()]),
                    first_seen: position,
                }),
            }
            position += 1;
        }
    }

    clusters.sort_by(|a, b| {
        b.domains
            .len()
            .cmp(&a.domains.len())
            .then(a.first_seen.cmp(&b.first_seen))
    });

    let summary: Vec<String> = clusters
        .into_iter()
        .take(max_bullets)
        .map(|c| c.representative)
        .collect();

    debug!(bullets = summary.len(), "extractive summary built");
    summary
}
