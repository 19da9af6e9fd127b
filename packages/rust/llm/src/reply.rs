//! Parsing helpers for free-text model replies.

use std::sync::LazyLock;

use regex::Regex;

/// Lines starting with these are framing, not content.
const PREAMBLE_PREFIXES: &[&str] = &[
    "here are",
    "here is",
    "summary:",
    "key points:",
    "based on",
    "the following",
];

/// Minimum length for an unmarked line to count as a bullet.
const MIN_UNMARKED_CHARS: usize = 20;

/// Pull the JSON payload out of a reply that may wrap it in a Markdown code fence.
pub fn extract_json_block(reply: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid regex")
    });

    match FENCE_RE.captures(reply).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => reply.trim(),
    }
}

/// Split a reply into bullet strings.
///
/// Accepts `•`, `-`, `*`, `1.` and `1)` markers. Unmarked lines are kept when
/// they are long enough and are not a preamble like "Here are the key points:".
pub fn parse_bullets(reply: &str) -> Vec<String> {
    static NUMBERED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\d{1,2}[.)]\s+").expect("valid regex"));

    let mut bullets = Vec::new();

    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let stripped = if let Some(rest) = line
            .strip_prefix('•')
            .or_else(|| line.strip_prefix("- "))
            .or_else(|| line.strip_prefix("* "))
        {
            Some(rest)
        } else {
            NUMBERED_RE.find(line).map(|m| &line[m.end()..])
        };

        let candidate = match stripped {
            Some(rest) => rest.trim(),
            None => {
                let lower = line.to_lowercase();
                if line.chars().count() <= MIN_UNMARKED_CHARS
                    || PREAMBLE_PREFIXES.iter().any(|p| lower.starts_with(p))
                    || line.starts_with('#')
                {
                    continue;
                }
                line
            }
        };

        let candidate = candidate.trim_matches('*').trim();
        if !candidate.is_empty() {
            bullets.push(candidate.to_string());
        }
    }

    bullets
}
