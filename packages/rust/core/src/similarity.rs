//! Token-overlap similarity between short claims.

use std::collections::HashSet;

/// Lowercased alphanumeric tokens of `text`.
pub(crate) fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two token sets; two empty sets count as identical.
pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Drop bullets whose tokens overlap an earlier kept bullet by `threshold` or more.
pub(crate) fn drop_near_duplicates(bullets: Vec<String>, threshold: f64) -> Vec<String> {
    let mut kept: Vec<(String, HashSet<String>)> = Vec::with_capacity(bullets.len());

    for bullet in bullets {
        let toks = tokens(&bullet);
        if kept.iter().any(|(_, k)| jaccard(k, &toks) >= threshold) {
            continue;
        }
        kept.push((bullet, toks));
    }

    kept.into_iter().map(|(b, _)| b).collect()
}
