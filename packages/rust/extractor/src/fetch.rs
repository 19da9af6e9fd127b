//! Guarded page fetching: SSRF checks, redirect policy, content-type and size limits.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::{Attempt, Policy};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use researchbrief_shared::{ExtractionConfig, ItemFailure, ResearchError};

/// How the fetched body should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Html,
    PlainText,
}

/// A successfully fetched response body.
#[derive(Debug)]
pub(crate) struct FetchedBody {
    pub kind: BodyKind,
    pub body: String,
}

/// Build the shared HTTP client.
///
/// Redirects are followed up to `max_redirects`, and every hop is re-checked
/// against the SSRF guard unless `allow_localhost` is set.
pub(crate) fn build_client(
    config: &ExtractionConfig,
    allow_localhost: bool,
) -> Result<Client, ResearchError> {
    let max_redirects = config.max_redirects;
    let policy = Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error("too many redirects")
        } else if !allow_localhost && is_ssrf_target(attempt.url()) {
            attempt.error("redirect to a blocked address")
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(policy)
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .map_err(|e| ResearchError::config(format!("failed to build HTTP client: {e}")))
}

/// Fetch `url` and return its body if it is readable text within the size cap.
pub(crate) async fn fetch_body(
    client: &Client,
    url: &Url,
    max_bytes: u64,
) -> Result<FetchedBody, ItemFailure> {
    debug!(%url, "fetching page");

    let mut response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(classify_fetch_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ItemFailure::FetchHttp {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let kind = body_kind(&content_type)?;

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(ItemFailure::UnsupportedContentType(format!(
                "body of {len} bytes exceeds the {max_bytes} byte limit"
            )));
        }
    }

    // Chunked or unlabelled bodies are counted as they arrive.
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify_fetch_error)? {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(ItemFailure::UnsupportedContentType(format!(
                "body exceeds the {max_bytes} byte limit"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    let body = String::from_utf8_lossy(&bytes).into_owned();
    Ok(FetchedBody { kind, body })
}

/// Classify a `Content-Type` header. A missing header is read as HTML.
fn body_kind(content_type: &str) -> Result<BodyKind, ItemFailure> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "" | "text/html" | "application/xhtml+xml" => Ok(BodyKind::Html),
        "text/plain" => Ok(BodyKind::PlainText),
        other => Err(ItemFailure::UnsupportedContentType(other.to_string())),
    }
}

fn classify_fetch_error(err: reqwest::Error) -> ItemFailure {
    if err.is_timeout() {
        ItemFailure::FetchTimeout
    } else {
        ItemFailure::FetchFailed(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Normalize a URL for deduplication (strip fragment, trailing path slash, lowercase host).
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            // Only the path is trimmed; the root path keeps its slash.
            if let Some(trimmed) = parsed
                .path()
                .strip_suffix('/')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
            {
                parsed.set_path(&trimmed);
            }
            parsed.to_string()
        }
        Err(_) => url.trim().to_string(),
    }
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
