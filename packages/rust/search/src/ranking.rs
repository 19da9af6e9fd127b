//! Result filtering and domain-trust ranking.

use url::Url;

/// Document links the extractor cannot read.
const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx"];

/// Established news outlets (checked before the generic `.ca` rule).
const NEWS_DOMAINS: &[&str] = &["cbc.ca", "globalnews.ca", "ctvnews.ca"];

/// Provincial and municipal portals.
const REGIONAL_GOV_DOMAINS: &[&str] = &["ontario.ca", "toronto.ca", "alberta.ca", "quebec.ca"];

/// Lowercased host of `url`, or `None` for non-HTTP(S) or host-less URLs.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Whether the URL points at a binary document rather than a web page.
pub fn is_document_link(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };
    DOCUMENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Trust score for a domain (higher is more trusted, 0 is untrusted).
///
/// 10: national government. 8: provincial/municipal government and other `.ca`.
/// 6: academic. 4: established news. 0: everything else.
pub fn trust_score(domain: &str) -> u8 {
    let domain = domain.trim_start_matches("www.");
    let matches = |suffix: &str| domain == suffix || domain.ends_with(&format!(".{suffix}"));

    if domain.ends_with(".gov")
        || domain.starts_with("gov.")
        || domain.contains(".gov.")
        || matches("gc.ca")
        || matches("canada.ca")
    {
        return 10;
    }
    if NEWS_DOMAINS.iter().any(|d| matches(*d)) {
        return 4;
    }
    if REGIONAL_GOV_DOMAINS.iter().any(|d| matches(*d)) || domain.ends_with(".ca") {
        return 8;
    }
    if domain.ends_with(".edu") || domain.contains(".ac.") || domain.contains(".edu.") {
        return 6;
    }
    0
}
