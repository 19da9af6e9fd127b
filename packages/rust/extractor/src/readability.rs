//! Main-content selection and boilerplate-aware text extraction.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

use crate::cleanup::collapse_whitespace;

/// Longest title kept before it is cut and suffixed with `...`.
const MAX_TITLE_CHARS: usize = 100;

/// Main-content candidates, most specific first.
const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    r#"[role="main"]"#,
    ".content",
    "#content",
    ".main-content",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".page-content",
];

/// Elements never holding article prose.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript", "svg",
    "canvas", "template", "button",
];

/// Landmark roles for site chrome.
const SKIP_ROLES: &[&str] = &["navigation", "banner", "contentinfo"];

/// Class or id tokens naming site chrome.
const NOISE_TOKENS: &[&str] = &[
    "nav",
    "navbar",
    "navigation",
    "menu",
    "sidebar",
    "breadcrumb",
    "breadcrumbs",
    "footer",
    "header",
    "cookie-banner",
    "cookie-notice",
    "cookies",
    "advert",
    "advertisement",
    "ad",
    "ads",
    "share",
    "social-share",
    "skip-link",
];

static MAIN_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    MAIN_CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("valid selector"))
        .collect()
});

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));

static H1_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

/// Readable text of the page's primary content.
///
/// The first main-content candidate with at least `min_chars` of text wins;
/// otherwise the whole `<body>` is used. Returned text is whitespace-collapsed
/// but not otherwise cleaned.
pub(crate) fn extract_main_text(doc: &Html, min_chars: usize) -> String {
    for sel in MAIN_SELECTORS.iter() {
        if let Some(el) = doc.select(sel).next() {
            let text = element_text(el);
            if text.chars().count() >= min_chars {
                return text;
            }
        }
    }

    doc.select(&BODY_SEL)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// Page title from `<title>`, falling back to the first `h1`.
pub(crate) fn extract_title(doc: &Html) -> Option<String> {
    let from = |sel: &Selector| {
        doc.select(sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    };

    from(&TITLE_SEL).or_else(|| from(&H1_SEL)).map(cap_title)
}

fn cap_title(title: String) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        title
    }
}

/// Text under `el`, skipping boilerplate subtrees, whitespace-collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(el, &mut parts);
    collapse_whitespace(&parts.join(" "))
}

fn collect_text<'a>(el: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !is_boilerplate(&child_el) {
                        collect_text(child_el, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn is_boilerplate(el: &ElementRef<'_>) -> bool {
    let value = el.value();

    if SKIP_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if let Some(role) = value.attr("role") {
        if SKIP_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    if value
        .classes()
        .any(|c| NOISE_TOKENS.contains(&c.to_ascii_lowercase().as_str()))
    {
        return true;
    }
    value
        .id()
        .is_some_and(|id| NOISE_TOKENS.contains(&id.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html><head><title>
        Housing Supply Action Plan | ontario.ca
    </title></head><body>
        <header><a href="/">Home</a></header>
        <nav><ul><li>Menu item</li></ul></nav>
        <main>
            <h1>Housing Supply Action Plan</h1>
            <div class="breadcrumbs">Home / Housing</div>
            <p>Ontario plans to build 1.5 million homes by 2031.</p>
            <script>var x = 1;</script>
            <p>The plan streamlines approvals for <b>new</b> housing.</p>
            <div class="share">Share on social</div>
            <span aria-hidden="true">decorative</span>
        </main>
        <footer>Copyright</footer>
    </body></html>"#;

    #[test]
    fn main_element_text_skips_boilerplate() {
        let doc = Html::parse_document(ARTICLE);
        let text = extract_main_text(&doc, 10);
        assert_eq!(
            text,
            "Housing Supply Action Plan Ontario plans to build 1.5 million homes by 2031. The plan streamlines approvals for new housing."
        );
    }

    #[test]
    fn short_candidates_fall_back_to_body() {
        let html = r#"<html><body>
            <article>Tiny</article>
            <div id="menu">Menu</div>
            <p>Body paragraph with the real content of the page.</p>
        </body></html>"#;
        let doc = Html::parse_document(html);
        let text = extract_main_text(&doc, 20);
        assert_eq!(text, "Tiny Body paragraph with the real content of the page.");
    }

    #[test]
    fn later_selector_used_when_earlier_missing() {
        let html = r#"<html><body>
            <div class="sidebar">Links</div>
            <div class="entry-content"><p>Entry content paragraph.</p></div>
        </body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_main_text(&doc, 5), "Entry content paragraph.");
    }

    #[test]
    fn title_is_collapsed() {
        let doc = Html::parse_document(ARTICLE);
        assert_eq!(
            extract_title(&doc).as_deref(),
            Some("Housing Supply Action Plan | ontario.ca")
        );
    }

    #[test]
    fn title_falls_back_to_h1_and_is_capped() {
        let long = "A".repeat(150);
        let html = format!("<html><body><h1>{long}</h1></body></html>");
        let doc = Html::parse_document(&html);
        let title = extract_title(&doc).unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS + 3);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn no_title_or_h1_is_none() {
        let doc = Html::parse_document("<html><body><p>text</p></body></html>");
        assert_eq!(extract_title(&doc), None);
    }
}
