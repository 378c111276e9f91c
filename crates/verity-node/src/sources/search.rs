//! DuckDuckGo-backed search sources.
//!
//! Queries go to the no-JavaScript HTML endpoint. Results are scraped from
//! the `result__a` / `result__snippet` anchors; redirect links are unwrapped
//! to the target URL carried in their `uddg` parameter.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;
use verity_core::{BoxFuture, SignalSource, SourceError, SourceOutput, VerificationRequest};

use super::html::{decode_entities, extract_text};
use super::truncate_chars;

const DDG_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const SEARCH_ATTEMPTS: u32 = 2;

static RESULT_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a([^>]*class="[^"]*result__a[^"]*"[^>]*)>(.*?)</a>"#)
        .expect("result title regex is valid")
});
static RESULT_SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<(?:a|div)[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</(?:a|div)>"#)
        .expect("result snippet regex is valid")
});
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("href regex is valid"));

// =============================================================================
// Client
// =============================================================================

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result snippet.
    pub snippet: String,
    /// Target URL.
    pub url: String,
}

impl SearchHit {
    fn line(&self) -> String {
        format!("[{}] {} ({})", self.title, self.snippet, self.url)
    }
}

/// Web search with one retry.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    retry_pause: Duration,
}

impl SearchClient {
    /// Creates a search client over `client`.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            retry_pause: Duration::from_secs(2),
        }
    }

    /// Runs `query`, retrying once after a short pause.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] when every attempt failed.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SourceError> {
        let mut last_error = None;
        for attempt in 1..=SEARCH_ATTEMPTS {
            match self.search_once(query).await {
                Ok(mut hits) => {
                    hits.truncate(max_results);
                    debug!(query, hits = hits.len(), "search completed");
                    return Ok(hits);
                },
                Err(err) => {
                    debug!(query, attempt, error = %err, "search attempt failed");
                    last_error = Some(err);
                    if attempt < SEARCH_ATTEMPTS {
                        tokio::time::sleep(self.retry_pause).await;
                    }
                },
            }
        }
        let reason = last_error.map_or_else(|| "no attempt made".to_string(), |err| err.to_string());
        warn!(query, error = %reason, "search exhausted retries");
        Err(SourceError::Unavailable(format!(
            "search exhausted retries: {reason}"
        )))
    }

    async fn search_once(&self, query: &str) -> Result<Vec<SearchHit>, SourceError> {
        let response = self
            .client
            .get(DDG_HTML_URL)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|err| SourceError::Http(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http(format!("HTTP {}", status.as_u16())));
        }
        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Parse(err.to_string()))?;
        Ok(parse_results(&body))
    }
}

/// Scrapes results from a DuckDuckGo HTML results page.
pub fn parse_results(page: &str) -> Vec<SearchHit> {
    let titles: Vec<_> = RESULT_TITLE.captures_iter(page).collect();
    let mut hits = Vec::with_capacity(titles.len());

    for (idx, caps) in titles.iter().enumerate() {
        let (Some(whole), Some(attrs), Some(title)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(url) = HREF
            .captures(attrs.as_str())
            .and_then(|href| href.get(1))
            .and_then(|href| resolve_link(href.as_str()))
        else {
            continue;
        };

        let block_end = titles
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(page.len(), |next| next.start());
        let snippet = RESULT_SNIPPET
            .captures(&page[whole.end()..block_end])
            .and_then(|snippet| snippet.get(1))
            .map(|snippet| extract_text(snippet.as_str(), 500))
            .unwrap_or_default();

        hits.push(SearchHit {
            title: extract_text(title.as_str(), 200),
            snippet,
            url,
        });
    }
    hits
}

/// Unwraps a DuckDuckGo redirect link to its target.
fn resolve_link(href: &str) -> Option<String> {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href
    };
    let parsed = Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, target)| target.into_owned());
    }
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

// =============================================================================
// Sources
// =============================================================================

fn results_payload(heading: &str, hits: &[SearchHit], max_chars: usize) -> Value {
    let lines: Vec<String> = hits.iter().map(SearchHit::line).collect();
    let combined = lines.join("\n");
    json!({
        "summary": format!("{heading}:\n{}", truncate_chars(&combined, max_chars)),
        "hits": hits.len(),
    })
}

fn empty_payload(summary: String) -> Value {
    json!({ "summary": summary, "hits": 0 })
}

/// Settlement-aware platform presence search.
#[derive(Debug, Clone)]
pub struct PlatformSearch {
    search: SearchClient,
    query_pause: Duration,
}

impl PlatformSearch {
    const MAX_QUERIES: usize = 2;
    const RESULTS_PER_QUERY: usize = 3;
    const MAX_LINES: usize = 6;

    /// Creates the source.
    #[must_use]
    pub const fn new(search: SearchClient) -> Self {
        Self {
            search,
            query_pause: Duration::from_secs(1),
        }
    }
}

/// Queries targeting the platform named by the settlement.
fn platform_queries(request: &VerificationRequest) -> Vec<String> {
    let name = &request.subject.name;
    let city = &request.subject.city;
    let settlement = &request.settlement;

    if settlement.mentions_any(&["grubhub", "seamless"]) {
        vec![
            format!("\"{name}\" {city} grubhub"),
            format!("\"{name}\" {city} site:grubhub.com"),
        ]
    } else if settlement.mentions_any(&["doordash", "caviar"]) {
        vec![format!("\"{name}\" {city} doordash")]
    } else if settlement.mentions_any(&["discover"]) {
        vec![
            format!("\"{name}\" {city} \"accepts discover\""),
            format!("\"{name}\" {city} discover card"),
        ]
    } else if ["payment card", "interchange"]
        .iter()
        .any(|kw| settlement.settlement_name.to_lowercase().contains(kw))
    {
        vec![format!(
            "\"{name}\" {city} credit card payment processing"
        )]
    } else {
        vec![format!("\"{name}\" {city} {}", settlement.defendant)
            .trim_end()
            .to_string()]
    }
}

impl SignalSource for PlatformSearch {
    fn name(&self) -> &str {
        "platform_search"
    }

    fn fetch(&self, request: &VerificationRequest) -> BoxFuture<'static, SourceOutput> {
        let search = self.search.clone();
        let pause = self.query_pause;
        let queries = platform_queries(request);
        let empty = format!(
            "No platform presence found for '{}' in {} related to {}.",
            request.subject.name, request.subject.city, request.settlement.defendant
        );
        Box::pin(async move {
            let mut hits = Vec::new();
            for (idx, query) in queries.iter().take(Self::MAX_QUERIES).enumerate() {
                if idx > 0 {
                    tokio::time::sleep(pause).await;
                }
                hits.extend(search.search(query, Self::RESULTS_PER_QUERY).await?);
            }
            hits.truncate(Self::MAX_LINES);
            if hits.is_empty() {
                return Ok(empty_payload(empty));
            }
            Ok(results_payload("Platform search results", &hits, 2_500))
        })
    }
}

/// General web context search (chain / franchise signals).
#[derive(Debug, Clone)]
pub struct GeneralSearch {
    search: SearchClient,
}

impl GeneralSearch {
    /// Creates the source.
    #[must_use]
    pub const fn new(search: SearchClient) -> Self {
        Self { search }
    }
}

impl SignalSource for GeneralSearch {
    fn name(&self) -> &str {
        "general_search"
    }

    fn fetch(&self, request: &VerificationRequest) -> BoxFuture<'static, SourceOutput> {
        let search = self.search.clone();
        let subject = &request.subject;
        let query = format!("\"{}\" {} {}", subject.name, subject.city, subject.state);
        let empty = format!(
            "No web results found for '{}' in {}, {}.",
            subject.name, subject.city, subject.state
        );
        Box::pin(async move {
            let hits = search.search(&query, 5).await?;
            if hits.is_empty() {
                return Ok(empty_payload(empty));
            }
            Ok(results_payload("General web search results", &hits, 2_500))
        })
    }
}

/// Review and listing presence search.
#[derive(Debug, Clone)]
pub struct ReviewSearch {
    search: SearchClient,
}

impl ReviewSearch {
    /// Creates the source.
    #[must_use]
    pub const fn new(search: SearchClient) -> Self {
        Self { search }
    }
}

impl SignalSource for ReviewSearch {
    fn name(&self) -> &str {
        "review_search"
    }

    fn fetch(&self, request: &VerificationRequest) -> BoxFuture<'static, SourceOutput> {
        let search = self.search.clone();
        let subject = &request.subject;
        let query = format!(
            "\"{}\" {} {} yelp OR reviews OR \"google reviews\"",
            subject.name, subject.city, subject.state
        );
        let empty = format!(
            "No review listings found for '{}' in {}.",
            subject.name, subject.city
        );
        Box::pin(async move {
            let hits = search.search(&query, 4).await?;
            if hits.is_empty() {
                return Ok(empty_payload(empty));
            }
            Ok(results_payload("Review/listing search results", &hits, 2_000))
        })
    }
}

#[cfg(test)]
mod tests {
    use verity_core::{SettlementRef, Subject};

    use super::*;

    const PAGE: &str = r#"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.grubhub.com%2Frestaurant%2Flucky-noodle&amp;rut=abc">Lucky <b>Noodle</b> House - Grubhub</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Order delivery from Lucky Noodle House in Wooster &amp; more.</a>
</div>
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="https://www.yelp.com/biz/lucky-noodle-wooster">Lucky Noodle - Yelp</a>
  </h2>
</div>
"#;

    fn request(settlement_name: &str, defendant: &str) -> VerificationRequest {
        VerificationRequest::new(
            Subject {
                name: "Lucky Noodle House".to_string(),
                city: "Wooster".to_string(),
                ..Subject::default()
            },
            SettlementRef {
                settlement_name: settlement_name.to_string(),
                defendant: defendant.to_string(),
                ..SettlementRef::default()
            },
        )
    }

    #[test]
    fn test_parse_results() {
        let hits = parse_results(PAGE);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Lucky Noodle House - Grubhub");
        assert_eq!(
            hits[0].url,
            "https://www.grubhub.com/restaurant/lucky-noodle"
        );
        assert_eq!(
            hits[0].snippet,
            "Order delivery from Lucky Noodle House in Wooster & more."
        );
        assert_eq!(hits[1].url, "https://www.yelp.com/biz/lucky-noodle-wooster");
        assert_eq!(hits[1].snippet, "");
    }

    #[test]
    fn test_parse_results_empty_page() {
        assert!(parse_results("<html><body>No results.</body></html>").is_empty());
    }

    #[test]
    fn test_platform_queries_follow_settlement() {
        let grubhub = platform_queries(&request("In re Grubhub Merchant Litigation", ""));
        assert_eq!(grubhub.len(), 2);
        assert!(grubhub[1].contains("site:grubhub.com"));

        let doordash = platform_queries(&request("Merchant Fee Settlement", "DoorDash, Inc."));
        assert_eq!(doordash, ["\"Lucky Noodle House\" Wooster doordash"]);

        let interchange = platform_queries(&request("Payment Card Interchange Fee", "Visa"));
        assert!(interchange[0].ends_with("credit card payment processing"));

        let other = platform_queries(&request("Widget Settlement", "Acme Corp"));
        assert_eq!(other, ["\"Lucky Noodle House\" Wooster Acme Corp"]);
    }

    #[test]
    fn test_interchange_keyed_on_settlement_name_only() {
        let by_defendant = platform_queries(&request("Merchant Fee Settlement", "Interchange Partners LLC"));
        assert_eq!(
            by_defendant,
            ["\"Lucky Noodle House\" Wooster Interchange Partners LLC"]
        );
    }

    #[test]
    fn test_results_payload_lists_hits() {
        let hits = parse_results(PAGE);
        let payload = results_payload("Platform search results", &hits, 2_500);
        assert_eq!(payload["hits"], 2);
        let summary = payload["summary"].as_str().unwrap();
        assert!(summary.starts_with("Platform search results:\n[Lucky Noodle House - Grubhub]"));
    }
}
