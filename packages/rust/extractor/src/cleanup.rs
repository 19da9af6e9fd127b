//! Text cleanup pipeline for extracted page text.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline strips site chrome phrases, links, and stray symbols that
//! survive the HTML walk, leaving prose suitable for summarization.

use std::sync::LazyLock;

use regex::Regex;

/// Documents with at least this many words are checked for repetition.
const REPETITION_MIN_WORDS: usize = 50;

/// Minimum ratio of distinct words to total words.
const MIN_UNIQUE_RATIO: f64 = 0.3;

/// Run the full cleanup pipeline on raw page text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = collapse_whitespace(text);

    result = remove_stock_phrases(&result);
    result = remove_urls_and_emails(&result);
    result = replace_stray_symbols(&result);
    result = collapse_whitespace(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Whitespace
// ---------------------------------------------------------------------------

/// Collapse every whitespace run into one space and trim the ends.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Stock navigation and footer phrases
// ---------------------------------------------------------------------------

fn remove_stock_phrases(text: &str) -> String {
    static STOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)skip to (?:main )?content|subscribe to (?:our )?newsletter|follow us on \w+|copyright \d{4}.*?(?:\.|$)|all rights reserved.*?(?:\.|$)|privacy policy|terms of (?:service|use)|cookie policy|sign up for.*?newsletter|share this.*?(?:\.|$)|print this page|email this page|last updated:.*?(?:\.|$)|date modified:.*?(?:\.|$)",
        )
        .expect("valid regex")
    });

    STOCK_RE.replace_all(text, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: URLs and e-mail addresses
// ---------------------------------------------------------------------------

fn remove_urls_and_emails(text: &str) -> String {
    static URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
    static EMAIL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").expect("valid regex"));

    let without_urls = URL_RE.replace_all(text, "");
    EMAIL_RE.replace_all(&without_urls, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Stray symbols
// ---------------------------------------------------------------------------

/// Replace decorative symbols (arrows, bullets, pipes) with spaces.
///
/// Keeps sentence punctuation plus `' " % $ / &` which carry meaning in figures
/// and names.
fn replace_stray_symbols(text: &str) -> String {
    static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"[^\w\s.,;:!?()'"%$/&-]"#).expect("valid regex")
    });

    SYMBOL_RE.replace_all(text, " ").to_string()
}

// ---------------------------------------------------------------------------
// Budget and quality
// ---------------------------------------------------------------------------

/// Cut `text` to at most `max_chars` characters on a char boundary.
///
/// Returns the text and whether anything was cut.
pub(crate) fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut cut = text;
            cut.truncate(byte_idx);
            (cut.trim_end().to_string(), true)
        }
        None => (text, false),
    }
}

/// Whether `text` has fewer than `min_words` whitespace-separated words.
pub(crate) fn is_too_short(text: &str, min_words: usize) -> bool {
    text.split_whitespace().take(min_words).count() < min_words
}

/// Whether `text` is dominated by repeated words (menus, tag clouds).
pub(crate) fn is_repetitive(text: &str) -> bool {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.len() < REPETITION_MIN_WORDS {
        return false;
    }

    let unique: std::collections::HashSet<&str> = words.iter().map(String::as_str).collect();
    (unique.len() as f64 / words.len() as f64) < MIN_UNIQUE_RATIO
}
