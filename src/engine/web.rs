// ── URL Fetch Port ─────────────────────────────────────────────────────────
// Fetches a web page and extracts readable text for ingestion enrichment.
//
// The SSRF guard is part of the port contract: URLs resolving to private,
// loopback, link-local, reserved, multicast or unspecified addresses are
// refused before any request leaves the process. Redirect targets are
// re-checked against the hostname rules (literal-IP and name blocklist);
// resolved-address rebinding after the initial check is accepted, matching
// the rest of the ecosystem's plain HTTP clients.

use log::{info, warn};
use scraper::{Html, Selector};
use std::net::IpAddr;
use std::time::Duration;
use url::{Host, Url};

use crate::atoms::constants::URL_FETCH_TIMEOUT_SECS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ExtractedContent;

/// Cap on extracted article text.
const MAX_PAGE_TEXT_CHARS: usize = 10_000;

/// Hostnames that never resolve anywhere we want to go.
const BLOCKED_HOSTNAMES: &[&str] = &["localhost", "localhost.localdomain", "ip6-localhost", "ip6-loopback"];

/// Check if an IP address is internal/blocked.
pub fn is_ip_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_multicast()
                || v4.is_unspecified()
                // 240.0.0.0/4 reserved block
                || v4.octets()[0] >= 240
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_ip_blocked(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Syntactic part of the guard: scheme, hostname blocklist, literal IPs.
fn check_url_shape(url: &Url) -> EngineResult<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!("unsupported URL scheme: {}", url.scheme())));
    }
    match url.host() {
        None => Err(EngineError::Validation("URL has no host".into())),
        Some(Host::Domain(name)) => {
            if BLOCKED_HOSTNAMES.contains(&name.to_ascii_lowercase().as_str()) {
                Err(EngineError::Validation("access to localhost is not allowed".into()))
            } else {
                Ok(())
            }
        }
        Some(Host::Ipv4(ip)) if is_ip_blocked(IpAddr::V4(ip)) => {
            Err(EngineError::Validation("access to internal addresses is not allowed".into()))
        }
        Some(Host::Ipv6(ip)) if is_ip_blocked(IpAddr::V6(ip)) => {
            Err(EngineError::Validation("access to internal addresses is not allowed".into()))
        }
        Some(_) => Ok(()),
    }
}

/// Full guard: shape check plus DNS resolution of domain hosts.
pub async fn check_url_safe(raw: &str) -> EngineResult<Url> {
    let url = Url::parse(raw).map_err(|e| EngineError::Validation(format!("invalid URL: {e}")))?;
    check_url_shape(&url)?;

    if let Some(Host::Domain(name)) = url.host() {
        let port = url.port_or_known_default().unwrap_or(443);
        // Unresolvable names are allowed through; the request itself fails.
        if let Ok(addrs) = tokio::net::lookup_host((name, port)).await {
            for addr in addrs {
                if is_ip_blocked(addr.ip()) {
                    warn!("[web] Blocked URL resolving to internal address: {raw}");
                    return Err(EngineError::Validation(
                        "access to internal addresses is not allowed".into(),
                    ));
                }
            }
        }
    }
    Ok(url)
}

/// Extract the first URL embedded in free text, if any.
pub fn extract_first_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|w| w.starts_with("http://") || w.starts_with("https://"))
        .map(|w| w.trim_end_matches(&[')', ']', '.', ',', ';', '>'][..]).to_string())
}

/// Fetch a page and pull out title + readable text.
pub async fn fetch_url(raw: &str) -> EngineResult<ExtractedContent> {
    let url = check_url_safe(raw).await?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::custom(|attempt| {
            // Re-apply the syntactic guard on every hop.
            if attempt.previous().len() > 5 {
                return attempt.error("too many redirects");
            }
            match check_url_shape(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(_) => attempt.error("redirect to blocked address"),
            }
        }))
        .timeout(Duration::from_secs(URL_FETCH_TIMEOUT_SECS))
        .build()?;

    let resp = client
        .get(url.clone())
        .header("User-Agent", "Mozilla/5.0 (compatible; NeuralInbox/1.0)")
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(EngineError::provider("url", format!("{} for {}", resp.status(), url)));
    }
    let html = resp.text().await?;
    let (title, text) = extract_readable(&html);

    if text.is_empty() && title.is_none() {
        return Err(EngineError::ExtractionFailed(format!("no readable content at {url}")));
    }
    info!("[web] Fetched {} — {} chars of text", url, text.len());
    Ok(ExtractedContent {
        text,
        title,
        source_type: "url".into(),
        metadata: serde_json::json!({ "url": raw }),
    })
}

/// Title + paragraph text from an HTML document.
fn extract_readable(html: &str) -> (Option<String>, String) {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    // The most specific selector that yields anything wins; falling through
    // to broader ones would duplicate the same paragraphs.
    let mut chunks: Vec<String> = Vec::new();
    for sel_str in ["article p", "main p", "p", "li"] {
        let Ok(sel) = Selector::parse(sel_str) else { continue };
        let found: Vec<String> = doc
            .select(&sel)
            .map(|node| {
                let text = node.text().collect::<String>();
                text.split_whitespace().collect::<Vec<_>>().join(" ")
            })
            .filter(|text| text.chars().count() > 30)
            .collect();
        if !found.is_empty() {
            chunks = found;
            break;
        }
    }
    let mut text = chunks.join("\n");
    if text.chars().count() > MAX_PAGE_TEXT_CHARS {
        text = text.chars().take(MAX_PAGE_TEXT_CHARS).collect();
    }
    (title, text)
}
