//! Query generation: research intent → categorized search queries.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use researchbrief_llm::{ChatModel, ChatRequest, extract_json_block};
use researchbrief_shared::{QueryCategory, ResearchError, ResearchRequest, Result, SearchQuery};

const QUERY_SYSTEM_PROMPT: &str = "You are a research assistant that generates precise web search \
queries for government and policy document research. Always return valid JSON.";

/// Produces the ordered query list for a request.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Generate at most `max_queries` queries. Never returns an empty list.
    async fn generate(
        &self,
        request: &ResearchRequest,
        max_queries: usize,
    ) -> Result<Vec<SearchQuery>>;
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Deterministic queries built from fixed templates, one per category.
pub struct TemplateQueryGenerator;

impl TemplateQueryGenerator {
    fn template(category: QueryCategory, request: &ResearchRequest) -> SearchQuery {
        let subject = &request.subject;
        let place = request.jurisdiction.as_deref().unwrap_or("government");

        let text = match category {
            QueryCategory::Background => format!("{subject} policy background {place}"),
            QueryCategory::Recent => format!("{subject} recent news updates {place}"),
            QueryCategory::Policy => match &request.jurisdiction {
                Some(j) => format!("{subject} official report government policy {j}"),
                None => format!("{subject} official report government policy"),
            },
            QueryCategory::Statistics => format!("{subject} statistics data {place}"),
            QueryCategory::News => format!("{subject} {place} announcement"),
        };
        SearchQuery::new(text, category)
    }

    /// One templated query per category, in taxonomy order.
    pub fn templates(request: &ResearchRequest) -> Vec<SearchQuery> {
        QueryCategory::ALL
            .iter()
            .map(|c| Self::template(*c, request))
            .collect()
    }
}

#[async_trait]
impl QueryGenerator for TemplateQueryGenerator {
    async fn generate(
        &self,
        request: &ResearchRequest,
        max_queries: usize,
    ) -> Result<Vec<SearchQuery>> {
        let queries = finalize_queries(Self::templates(request), request, max_queries);
        info!(count = queries.len(), "generated template queries");
        Ok(queries)
    }
}

// ---------------------------------------------------------------------------
// Language-model generator
// ---------------------------------------------------------------------------

/// Queries from a chat model, with an optional fallback to templates.
pub struct LlmQueryGenerator {
    model: Arc<dyn ChatModel>,
    model_name: String,
    fallback_to_templates: bool,
}

impl LlmQueryGenerator {
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            fallback_to_templates: false,
        }
    }

    /// Use templated queries instead of failing when the model is unusable.
    pub fn with_template_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_templates = enabled;
        self
    }

    fn build_prompt(request: &ResearchRequest, max_queries: usize) -> String {
        let jurisdiction = request.jurisdiction.as_deref().unwrap_or("General");
        let categories = QueryCategory::ALL
            .iter()
            .take(max_queries.max(1))
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Generate up to {max_queries} web search queries for the following document:\n\
             - Subject: {subject}\n\
             - Purpose: {purpose}\n\
             - Jurisdiction: {jurisdiction}\n\n\
             Use a different category for each query, drawn from: {categories}.\n\
             background = context, definitions, established policies; recent = news and current \
             developments; policy = government reports and regulatory documents; statistics = \
             figures and data; news = announcements and coverage.\n\
             Include the jurisdiction in each query when one is given. Prefer official and \
             authoritative sources.\n\n\
             Return a JSON array of objects with \"query\" and \"category\" fields, for example:\n\
             [{{\"query\": \"housing affordability policy framework Canada\", \"category\": \"background\"}}]",
            subject = request.subject,
            purpose = request.purpose,
        )
    }

    async fn generate_with_model(
        &self,
        request: &ResearchRequest,
        max_queries: usize,
    ) -> Result<Vec<SearchQuery>> {
        let chat = ChatRequest::prompt(
            &self.model_name,
            QUERY_SYSTEM_PROMPT,
            Self::build_prompt(request, max_queries),
        )
        .temperature(0.7)
        .max_tokens(300);

        let reply = self
            .model
            .complete(chat)
            .await
            .map_err(|e| ResearchError::generation(e.to_string()))?;
        debug!(reply_len = reply.len(), "query model replied");

        let parsed = parse_query_reply(&reply)?;
        let queries = finalize_queries(parsed, request, max_queries);
        if queries.is_empty() {
            return Err(ResearchError::generation("model returned no usable queries"));
        }
        Ok(queries)
    }
}

#[async_trait]
impl QueryGenerator for LlmQueryGenerator {
    #[instrument(skip_all, fields(max_queries = max_queries))]
    async fn generate(
        &self,
        request: &ResearchRequest,
        max_queries: usize,
    ) -> Result<Vec<SearchQuery>> {
        match self.generate_with_model(request, max_queries).await {
            Ok(queries) => {
                info!(count = queries.len(), "generated queries");
                Ok(queries)
            }
            Err(e) if self.fallback_to_templates => {
                warn!(error = %e, "query model failed, using templates");
                TemplateQueryGenerator.generate(request, max_queries).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse a JSON array of `{query, category}` objects (or bare strings).
fn parse_query_reply(reply: &str) -> Result<Vec<SearchQuery>> {
    let value: Value = serde_json::from_str(extract_json_block(reply))
        .map_err(|e| ResearchError::generation(format!("query reply is not valid JSON: {e}")))?;

    // Some models wrap the array: {"queries": [...]}
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("queries") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(q) => Some(SearchQuery::new(q, QueryCategory::Background)),
            Value::Object(map) => {
                let query = map.get("query")?.as_str()?.to_string();
                let category = map
                    .get("category")
                    .and_then(Value::as_str)
                    .map(QueryCategory::from_label)
                    .unwrap_or(QueryCategory::Background);
                Some(SearchQuery::new(query, category))
            }
            _ => None,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// Normalize a raw query list into the final, bounded list.
///
/// Collapses whitespace, drops blanks and case-insensitive duplicates, adds the
/// jurisdiction where missing, and makes sure the list spans at least two
/// categories when more than one query is allowed.
pub fn finalize_queries(
    raw: Vec<SearchQuery>,
    request: &ResearchRequest,
    max_queries: usize,
) -> Vec<SearchQuery> {
    let max_queries = max_queries.max(1);
    let mut seen = HashSet::new();
    let mut queries: Vec<SearchQuery> = Vec::new();

    let mut push = |q: SearchQuery, out: &mut Vec<SearchQuery>| {
        let Some(q) = normalize_query(q, request) else {
            return;
        };
        if seen.insert(q.query.to_lowercase()) {
            out.push(q);
        }
    };

    for q in raw {
        push(q, &mut queries);
    }

    let single_category = queries
        .first()
        .is_some_and(|first| queries.iter().all(|q| q.category == first.category));

    if single_category && max_queries > 1 {
        let used = queries[0].category;
        queries.truncate(max_queries - 1);
        let extra = TemplateQueryGenerator::templates(request)
            .into_iter()
            .filter(|t| t.category != used);
        for t in extra {
            let before = queries.len();
            push(t, &mut queries);
            if queries.len() > before {
                break;
            }
        }
    }

    queries.truncate(max_queries);
    queries
}

fn normalize_query(q: SearchQuery, request: &ResearchRequest) -> Option<SearchQuery> {
    let mut text = q.query.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    if let Some(j) = &request.jurisdiction {
        if !text.to_lowercase().contains(&j.to_lowercase()) {
            text = format!("{text} {j}");
        }
    }

    Some(SearchQuery::new(text, q.category))
}
