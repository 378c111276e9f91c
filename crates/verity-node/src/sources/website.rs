//! Business website fetch.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::USER_AGENT;
use serde_json::{Value, json};
use tracing::debug;
use verity_core::{BoxFuture, SignalSource, SourceError, SourceOutput, VerificationRequest};

use super::html::extract_text;
use super::{ALT_USER_AGENT, BROWSER_USER_AGENT, truncate_chars};

const NAME: &str = "business_website";
const ATTEMPTS: u32 = 3;
const MAX_PAGE_CHARS: usize = 4_000;
const MAX_SUMMARY_CHARS: usize = 3_500;
const MIN_CONTENT_CHARS: usize = 50;

/// Fetches the claimed website and reports its visible text.
#[derive(Debug, Clone)]
pub struct BusinessWebsite {
    client: reqwest::Client,
    backoff: Duration,
}

impl BusinessWebsite {
    /// Creates the source over `client`.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff: Duration::from_millis(1_500),
        }
    }
}

impl SignalSource for BusinessWebsite {
    fn name(&self) -> &str {
        NAME
    }

    fn fetch(&self, request: &VerificationRequest) -> BoxFuture<'static, SourceOutput> {
        let client = self.client.clone();
        let backoff = self.backoff;
        let website = request.subject.website().map(with_scheme);
        Box::pin(async move {
            match website {
                Some(url) => fetch_site(&client, &url, backoff).await,
                None => Ok(json!({ "summary": "No website available for this business." })),
            }
        })
    }
}

fn with_scheme(website: &str) -> String {
    if website.contains("://") {
        website.to_string()
    } else {
        format!("https://{website}")
    }
}

const fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

async fn fetch_site(client: &reqwest::Client, url: &str, backoff: Duration) -> SourceOutput {
    let mut last_error = String::from("no attempt made");

    for attempt in 0..ATTEMPTS {
        let user_agent = if attempt + 1 < ATTEMPTS {
            BROWSER_USER_AGENT
        } else {
            ALT_USER_AGENT
        };

        let response = match client.get(url).header(USER_AGENT, user_agent).send().await {
            Ok(response) => response,
            Err(err) if err.is_connect() || err.is_timeout() => {
                debug!(url, attempt, error = %err, "website fetch failed, retrying");
                last_error = err.to_string();
                pause_before_retry(attempt, backoff).await;
                continue;
            },
            Err(err) => {
                last_error = err.to_string();
                break;
            },
        };

        let status = response.status();
        if is_retryable(status) {
            last_error = format!("HTTP {}", status.as_u16());
            pause_before_retry(attempt, backoff).await;
            continue;
        }
        if status == StatusCode::FORBIDDEN && attempt == 0 {
            last_error = "HTTP 403 Forbidden".to_string();
            pause_before_retry(attempt, backoff).await;
            continue;
        }
        if !status.is_success() {
            last_error = format!("HTTP {}", status.as_u16());
            break;
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Parse(err.to_string()))?;
        return Ok(page_payload(url, &extract_text(&body, MAX_PAGE_CHARS)));
    }

    Err(SourceError::Unavailable(format!(
        "website unreachable: {last_error}"
    )))
}

/// Back-off before the attempt after `attempt`; `None` once none remain.
fn retry_pause(attempt: u32, backoff: Duration) -> Option<Duration> {
    (attempt + 1 < ATTEMPTS).then(|| backoff * (attempt + 1))
}

async fn pause_before_retry(attempt: u32, backoff: Duration) {
    if let Some(pause) = retry_pause(attempt, backoff) {
        tokio::time::sleep(pause).await;
    }
}

fn page_payload(url: &str, text: &str) -> Value {
    if text.chars().count() < MIN_CONTENT_CHARS {
        return json!({
            "url": url,
            "summary": "Website returned minimal content (possibly JS-rendered or down).",
        });
    }
    json!({
        "url": url,
        "summary": format!("Website content: {}", truncate_chars(text, MAX_SUMMARY_CHARS)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("luckynoodle.example"), "https://luckynoodle.example");
        assert_eq!(with_scheme("http://a.example"), "http://a.example");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::FORBIDDEN));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_no_pause_after_final_attempt() {
        let backoff = Duration::from_millis(1_500);
        assert_eq!(retry_pause(0, backoff), Some(backoff));
        assert_eq!(retry_pause(1, backoff), Some(backoff * 2));
        assert_eq!(retry_pause(ATTEMPTS - 1, backoff), None);
    }

    #[test]
    fn test_minimal_content_flagged() {
        let payload = page_payload("https://a.example", "Loading...");
        assert!(
            payload["summary"]
                .as_str()
                .unwrap()
                .starts_with("Website returned minimal content")
        );
    }

    #[test]
    fn test_content_summary() {
        let text = "Lucky Noodle House serves hand-pulled noodles in Wooster since 2016. Order on Grubhub.";
        let payload = page_payload("https://a.example", text);
        assert_eq!(payload["url"], "https://a.example");
        assert_eq!(
            payload["summary"].as_str().unwrap(),
            format!("Website content: {text}")
        );
    }

    #[tokio::test]
    async fn test_no_website_is_ok_payload() {
        let source = BusinessWebsite::new(reqwest::Client::new());
        let payload = source
            .fetch(&VerificationRequest::default())
            .await
            .unwrap();
        assert_eq!(
            payload["summary"],
            "No website available for this business."
        );
    }
}
