//! HTTP signal sources.
//!
//! ```text
//! business_website   direct fetch of the claimed site
//! wayback_archive    Wayback CDX index + sampled snapshot bodies
//! platform_search    settlement-aware DuckDuckGo queries
//! general_search     one DuckDuckGo query (chain / franchise signals)
//! review_search      one DuckDuckGo query for review listings
//! ```
//!
//! Sources are registered in that order, which is the order their findings
//! appear in the reasoning prompt.

mod html;
mod search;
mod wayback;
mod website;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use search::{GeneralSearch, PlatformSearch, ReviewSearch, SearchClient};
use verity_core::Verifier;
use wayback::WaybackArchive;
use website::BusinessWebsite;

/// Desktop browser user agent.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Alternate user agent for a last attempt against picky sites.
const ALT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Connect deadline shared by every source client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Per-request deadline for site and search fetches.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(12);

/// Per-request deadline for archive fetches.
const ARCHIVE_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Builds a browser-like HTTP client.
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .context("failed to build source HTTP client")
}

/// Registers the five standard sources on `verifier`.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be initialized.
pub fn register_all(verifier: Verifier) -> Result<Verifier> {
    let client = http_client(REQUEST_TIMEOUT)?;
    let archive_client = http_client(ARCHIVE_REQUEST_TIMEOUT)?;
    let search = SearchClient::new(client.clone());

    Ok(verifier
        .with_source(Arc::new(BusinessWebsite::new(client)))
        .with_archive(Arc::new(WaybackArchive::new(archive_client)))
        .with_source(Arc::new(PlatformSearch::new(search.clone())))
        .with_source(Arc::new(GeneralSearch::new(search.clone())))
        .with_source(Arc::new(ReviewSearch::new(search))))
}

/// Cuts `text` to at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
