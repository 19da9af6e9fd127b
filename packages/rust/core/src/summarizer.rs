//! Per-source summarization: extracted text → a few factual bullets.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use researchbrief_llm::{ChatModel, ChatRequest, parse_bullets};
use researchbrief_shared::{
    ExtractedDocument, ItemFailure, MAX_SOURCE_BULLETS_CAP, SourceSummary, SummarizationConfig,
};

use crate::similarity::drop_near_duplicates;

/// Bullets at least this similar to an earlier one are dropped.
const DUPLICATE_THRESHOLD: f64 = 0.8;

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert policy analyst who writes concise, factual \
summaries for government document drafters. Use only facts stated in the provided text.";

const CONSOLIDATE_SYSTEM_PROMPT: &str =
    "You consolidate multiple summaries of one document into its most important key points.";

/// Reduces one extracted document to bullet points.
#[async_trait]
pub trait SourceSummarizer: Send + Sync {
    /// Between 1 and the configured maximum bullets, or a `Summarization` failure.
    async fn summarize(&self, document: &ExtractedDocument) -> Result<Vec<String>, ItemFailure>;
}

/// Pair a document with its bullets for the response.
pub fn source_summary(document: &ExtractedDocument, bullets: Vec<String>) -> SourceSummary {
    SourceSummary {
        title: document
            .title
            .clone()
            .unwrap_or_else(|| document.domain.clone()),
        url: document.url.clone(),
        domain: document.domain.clone(),
        date_accessed: document.date_accessed,
        source_summary: bullets,
    }
}

/// [`SourceSummarizer`] backed by a chat model.
pub struct LlmSummarizer {
    model: Arc<dyn ChatModel>,
    model_name: String,
    max_bullets: usize,
    chunk_chars: usize,
    min_chars: usize,
}

impl LlmSummarizer {
    pub fn new(
        model: Arc<dyn ChatModel>,
        model_name: impl Into<String>,
        config: &SummarizationConfig,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            max_bullets: config.max_bullets.clamp(1, MAX_SOURCE_BULLETS_CAP),
            chunk_chars: config.chunk_chars.max(500),
            min_chars: config.min_chars,
        }
    }

    async fn summarize_chunk(
        &self,
        chunk: &str,
        document: &ExtractedDocument,
    ) -> Result<Vec<String>, ItemFailure> {
        let title = document.title.as_deref().unwrap_or("Untitled");
        let prompt = format!(
            "Summarize the following document into {max} or fewer bullet points.\n\n\
             Document Title: {title}\n\
             Source Domain: {domain}\n\n\
             Focus on key facts, figures and statistics, policy decisions, government \
             initiatives, and relevant dates. Each bullet must be one or two sentences \
             stating a specific claim made by this text. Do not repeat a claim.\n\n\
             Text to summarize:\n{chunk}\n\n\
             Return only the bullet points, starting each with \"•\".",
            max = self.max_bullets,
            domain = document.domain,
        );

        let reply = self
            .model
            .complete(
                ChatRequest::prompt(&self.model_name, SUMMARY_SYSTEM_PROMPT, prompt)
                    .temperature(0.3)
                    .max_tokens(400),
            )
            .await
            .map_err(|e| ItemFailure::Summarization(e.to_string()))?;

        Ok(parse_bullets(&reply))
    }

    async fn consolidate(&self, bullets: &[String], document: &ExtractedDocument) -> Option<Vec<String>> {
        let title = document.title.as_deref().unwrap_or("Untitled");
        let combined = bullets
            .iter()
            .map(|b| format!("• {b}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "The following bullet points summarize different sections of the same document: \
             \"{title}\".\n\n\
             Consolidate them into at most {max} key bullet points that capture the most \
             important information. Do not add facts that are not listed.\n\n\
             {combined}\n\n\
             Return only the consolidated bullet points, starting each with \"•\".",
            max = self.max_bullets,
        );

        match self
            .model
            .complete(
                ChatRequest::prompt(&self.model_name, CONSOLIDATE_SYSTEM_PROMPT, prompt)
                    .temperature(0.2)
                    .max_tokens(300),
            )
            .await
        {
            Ok(reply) => Some(parse_bullets(&reply)).filter(|b| !b.is_empty()),
            Err(e) => {
                warn!(url = %document.url, error = %e, "consolidation failed, keeping chunk bullets");
                None
            }
        }
    }
}

#[async_trait]
impl SourceSummarizer for LlmSummarizer {
    async fn summarize(&self, document: &ExtractedDocument) -> Result<Vec<String>, ItemFailure> {
        if document.text.chars().count() < self.min_chars {
            return Err(ItemFailure::Summarization(format!(
                "extracted text is shorter than {} characters",
                self.min_chars
            )));
        }

        let chunks = chunk_text(&document.text, self.chunk_chars);
        let bullets = if chunks.len() == 1 {
            self.summarize_chunk(&chunks[0], document).await?
        } else {
            let mut all = Vec::new();
            let mut last_err = None;
            for chunk in &chunks {
                match self.summarize_chunk(chunk, document).await {
                    Ok(b) => all.extend(b),
                    Err(e) => last_err = Some(e),
                }
            }
            if all.is_empty() {
                return Err(last_err.unwrap_or_else(|| {
                    ItemFailure::Summarization("no bullets from any chunk".into())
                }));
            }
            match self.consolidate(&all, document).await {
                Some(consolidated) => consolidated,
                None => all,
            }
        };

        let mut bullets = drop_near_duplicates(bullets, DUPLICATE_THRESHOLD);
        bullets.truncate(self.max_bullets);

        if bullets.is_empty() {
            return Err(ItemFailure::Summarization("model returned no bullets".into()));
        }

        debug!(url = %document.url, chunks = chunks.len(), bullets = bullets.len(), "source summarized");
        Ok(bullets)
    }
}

/// Split `text` into chunks of at most `max_chars` characters on sentence boundaries.
///
/// A single sentence longer than `max_chars` is split at character boundaries.
pub(crate) fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();

        if len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = sentence.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }

        let extra = if current.is_empty() { len } else { len + 1 };
        if current_len + extra > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Sentences of `text`, each keeping its terminal punctuation.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') && bytes.get(i + 1).is_some_and(|n| *n == b' ') {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i + 1;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
