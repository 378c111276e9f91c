//! Wayback Machine archive query.
//!
//! ```text
//! captures(domain)
//!     |-- CDX index: HTML 2xx/3xx captures, digest-collapsed, <= 200 rows
//!     |-- sample_captures(rows, 8)      earliest few + latest + even steps
//!     `-- per sampled row:
//!           3xx -> Redirect capture from the index status, no body fetch
//!           2xx -> fetch raw snapshot (id_), extract text,
//!                  classify, fingerprint -> ArchiveCapture
//! ```
//!
//! A sampled snapshot that cannot be fetched still yields a capture with an
//! empty signature: it proves the domain existed then but can never match
//! an identity.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;
use verity_core::archive::{MAX_SIGNATURE_CHARS, sample_captures};
use verity_core::{
    ArchiveCapture, ArchiveQuery, BoxFuture, ContentSignature, SourceError, UrlState,
};

use super::html::extract_text;

const CDX_URL: &str = "https://web.archive.org/cdx/search/cdx";
const VIEW_BASE: &str = "https://web.archive.org/web";
const CDX_ROW_LIMIT: &str = "200";
const DEFAULT_MAX_SAMPLES: usize = 8;
const MIN_SNAPSHOT_CHARS: usize = 40;

/// One CDX index row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CdxRow {
    timestamp: String,
    original: String,
    status: u16,
}

/// [`ArchiveQuery`] over the public Wayback Machine.
#[derive(Debug, Clone)]
pub struct WaybackArchive {
    client: reqwest::Client,
    max_samples: usize,
}

impl WaybackArchive {
    /// Creates the archive client.
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl ArchiveQuery for WaybackArchive {
    fn captures(
        &self,
        domain: &str,
    ) -> BoxFuture<'static, Result<Vec<ArchiveCapture>, SourceError>> {
        let client = self.client.clone();
        let max_samples = self.max_samples;
        let domain = domain.to_string();
        Box::pin(async move {
            let rows = query_index(&client, &domain).await?;
            let sampled = sample_captures(&rows, max_samples);
            debug!(
                domain = %domain,
                indexed = rows.len(),
                sampled = sampled.len(),
                "wayback index queried"
            );

            let mut captures = Vec::with_capacity(sampled.len());
            for row in &sampled {
                if let Some(capture) = fetch_capture(&client, row).await {
                    captures.push(capture);
                }
            }
            Ok(captures)
        })
    }
}

async fn query_index(client: &reqwest::Client, domain: &str) -> Result<Vec<CdxRow>, SourceError> {
    let url_pattern = format!("{domain}/*");
    let params = [
        ("url", url_pattern.as_str()),
        ("output", "json"),
        ("fl", "timestamp,original,statuscode,mimetype,digest"),
        ("filter", "statuscode:[23].."),
        ("filter", "mimetype:text/html"),
        ("collapse", "digest"),
        ("from", "1996"),
        ("limit", CDX_ROW_LIMIT),
    ];
    let response = client
        .get(CDX_URL)
        .query(&params)
        .send()
        .await
        .map_err(|err| SourceError::Http(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Http(format!(
            "archive index returned HTTP {}",
            status.as_u16()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|err| SourceError::Parse(err.to_string()))?;
    parse_index(&body)
}

/// Parses the CDX JSON table (header row first) into sorted rows.
fn parse_index(body: &str) -> Result<Vec<CdxRow>, SourceError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let table: Value =
        serde_json::from_str(body).map_err(|err| SourceError::Parse(err.to_string()))?;
    let Some(table) = table.as_array() else {
        return Err(SourceError::Parse("archive index is not a table".to_string()));
    };

    let mut rows: Vec<CdxRow> = table
        .iter()
        .skip(1)
        .filter_map(|row| {
            let row = row.as_array()?;
            Some(CdxRow {
                timestamp: row.first()?.as_str()?.to_string(),
                original: row.get(1)?.as_str()?.to_string(),
                // Revisit rows carry "-" as their status.
                status: row
                    .get(2)
                    .and_then(Value::as_str)
                    .and_then(|code| code.parse().ok())
                    .unwrap_or(200),
            })
        })
        .filter(|row| parse_timestamp(&row.timestamp).is_some())
        .collect();
    rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(rows)
}

/// Parses a `YYYYMMDDhhmmss` capture timestamp.
fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    let digits = timestamp.get(..14)?;
    NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

async fn fetch_capture(client: &reqwest::Client, row: &CdxRow) -> Option<ArchiveCapture> {
    let timestamp = parse_timestamp(&row.timestamp)?;
    let raw_url = format!("{VIEW_BASE}/{}id_/{}", row.timestamp, row.original);
    let snapshot_url = Some(format!("{VIEW_BASE}/{}/{}", row.timestamp, row.original));

    let unreadable = ArchiveCapture {
        timestamp,
        url_state: UrlState::classify(row.status, ""),
        content_signature: ContentSignature::default(),
        snapshot_url: snapshot_url.clone(),
    };
    if unreadable.url_state == UrlState::Redirect {
        return Some(unreadable);
    }

    let response = match client.get(&raw_url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(url = %raw_url, error = %err, "snapshot fetch failed");
            return Some(unreadable);
        },
    };
    let status = response.status().as_u16();
    if status >= 400 {
        debug!(url = %raw_url, status, "snapshot unavailable");
        return Some(unreadable);
    }
    let Ok(body) = response.text().await else {
        return Some(unreadable);
    };
    let text = extract_text(&body, MAX_SIGNATURE_CHARS);
    if text.chars().count() < MIN_SNAPSHOT_CHARS {
        return Some(unreadable);
    }

    Some(ArchiveCapture {
        timestamp,
        url_state: UrlState::classify(status, &text),
        content_signature: ContentSignature::from_text(&text),
        snapshot_url,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_parse_index_skips_header_and_sorts() {
        let body = r#"[
            ["timestamp", "original", "statuscode", "mimetype", "digest"],
            ["20190301120000", "http://luckynoodle.example/", "200", "text/html", "B"],
            ["20120105080000", "http://luckynoodle.example/", "200", "text/html", "A"],
            ["bogus", "http://luckynoodle.example/menu", "200", "text/html", "C"],
            ["20150101000000"]
        ]"#;

        let rows = parse_index(body).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "20120105080000");
        assert_eq!(rows[1].timestamp, "20190301120000");
        assert_eq!(rows[0].status, 200);
    }

    #[tokio::test]
    async fn test_redirect_row_becomes_redirect_capture() {
        let body = r#"[
            ["timestamp", "original", "statuscode", "mimetype", "digest"],
            ["20130402000000", "http://luckynoodle.example/", "301", "text/html", "R"],
            ["20140402000000", "http://luckynoodle.example/", "-", "text/html", "V"]
        ]"#;
        let rows = parse_index(body).unwrap();
        assert_eq!(rows[0].status, 301);
        assert_eq!(rows[1].status, 200);

        // Redirect rows are resolved from the index without a network call.
        let capture = fetch_capture(&reqwest::Client::new(), &rows[0]).await.unwrap();
        assert_eq!(capture.url_state, UrlState::Redirect);
        assert_eq!(capture.content_signature, ContentSignature::default());
        assert_eq!(
            capture.snapshot_url.as_deref(),
            Some("https://web.archive.org/web/20130402000000/http://luckynoodle.example/")
        );
    }

    #[test]
    fn test_parse_index_empty_and_invalid() {
        assert!(parse_index("").unwrap().is_empty());
        assert!(parse_index("[]").unwrap().is_empty());
        assert!(matches!(
            parse_index("{\"error\": 1}"),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(parse_index("<html>"), Err(SourceError::Parse(_))));
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("20120105080000"),
            Some(Utc.with_ymd_and_hms(2012, 1, 5, 8, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("2012"), None);
        assert_eq!(parse_timestamp("20121399000000"), None);
    }
}
