//! HTML evidence packs.
//!
//! Two audiences:
//!
//! - `client`: outcome, confidence band, settlement summary and next steps
//! - `internal`: everything above plus the numeric confidence, rationale,
//!   checks performed and every finding, including negative evidence
//!
//! Every interpolated value goes through [`escape`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde_json::Value;
use verity_core::evidence::negative_evidence;
use verity_core::{Eligibility, FindingStatus, VerificationRequest, VerificationResult};

/// Evidence pack audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PackKind {
    /// Business owner facing.
    Client,
    /// Operator facing, with diagnostics.
    Internal,
}

impl PackKind {
    const fn title(self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Internal => "Internal",
        }
    }

    const fn file_suffix(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Renders a self-contained HTML evidence pack.
#[must_use]
pub fn render_pack(
    request: &VerificationRequest,
    result: &VerificationResult,
    kind: PackKind,
) -> String {
    render_pack_at(request, result, kind, Utc::now())
}

fn render_pack_at(
    request: &VerificationRequest,
    result: &VerificationResult,
    kind: PackKind,
    generated_at: DateTime<Utc>,
) -> String {
    let subject = &request.subject;
    let settlement = &request.settlement;

    let business_name = non_empty(&subject.name, "Unknown Business");
    let settlement_name = non_empty(&settlement.settlement_name, "Unknown Settlement");
    let summary = non_empty(&settlement.summary, "Summary not available.");
    let class_description = non_empty(&settlement.eligible_class_description, "Not provided");

    let website = subject
        .website()
        .map_or_else(|| "Not provided".to_string(), link);
    let claim_link = settlement
        .claim_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .map_or_else(|| "Not available".to_string(), link);

    let internal = match kind {
        PackKind::Client => String::new(),
        PackKind::Internal => internal_section(result),
    };

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title_business} - {title_settlement} ({kind_title})</title>
  <style>
    body {{ margin: 0; padding: 2rem 1rem; background: #f7f7f2; color: #1f2a30; font: 16px/1.5 Georgia, serif; }}
    main {{ max-width: 900px; margin: 0 auto; background: #fff; border: 1px solid #dfe5e7; border-radius: 14px; padding: 1.5rem; }}
    .meta {{ color: #637177; font-size: 0.95rem; }}
    .badge {{ display: inline-block; background: #e6f4f1; border: 1px solid #bfe3dc; border-radius: 999px; padding: 0.2rem 0.6rem; font-size: 0.85rem; }}
    section {{ margin-top: 1.25rem; padding-top: 1rem; border-top: 1px solid #dfe5e7; }}
    .failed {{ color: #9a3412; }}
    a {{ color: #0f766e; }}
  </style>
</head>
<body>
  <main>
    <h1>Settlement Evidence Pack ({kind_title})</h1>
    <p class="meta">Generated: {generated}</p>
    <p>
      <span class="badge">Business: {business}</span>
      <span class="badge">Settlement: {settlement_badge}</span>
      <span class="badge">Outcome: {outcome}</span>
      <span class="badge">Confidence: {band}</span>
    </p>

    <section>
      <h2>Business Snapshot</h2>
      <p><strong>Location:</strong> {location}</p>
      <p><strong>Category:</strong> {category}</p>
      <p><strong>Website:</strong> {website}</p>
    </section>

    <section>
      <h2>Eligibility Snapshot</h2>
      <p>{summary}</p>
      <p><strong>Class description:</strong> {class_description}</p>
      <p><strong>Claim deadline:</strong> {deadline}</p>
      <p><strong>Claim method:</strong> {method}</p>
      <p><strong>Claim link:</strong> {claim_link}</p>
      <h3>Qualifying Signals</h3>
      {actions}
    </section>

    <section>
      <h2>Next Steps</h2>
      <p>{next_step}</p>
      <h3>Potential Supporting Documents</h3>
      {proof}
    </section>
{internal}  </main>
</body>
</html>
"#,
        title_business = escape(business_name),
        title_settlement = escape(settlement_name),
        kind_title = kind.title(),
        generated = escape(&generated_at.format("%Y-%m-%d %H:%M UTC").to_string()),
        business = escape(business_name),
        settlement_badge = escape(settlement_name),
        outcome = outcome_label(result.eligible()),
        band = result.confidence().band(),
        location = escape(&location(&subject.city, &subject.state)),
        category = escape(subject.category.as_deref().unwrap_or("Unknown category")),
        summary = escape(summary),
        class_description = escape(class_description),
        deadline = escape(settlement.claim_deadline.as_deref().unwrap_or("Not provided")),
        method = escape(settlement.claim_method.as_deref().unwrap_or("online")),
        actions = render_list(
            &settlement.eligible_actions,
            "No specific qualifying actions were identified."
        ),
        next_step = next_step(result.eligible()),
        proof = render_list(
            &settlement.proof_required,
            "No specific proof requirements were identified."
        ),
    )
}

fn internal_section(result: &VerificationResult) -> String {
    let checks: Vec<String> = result.checks_performed().iter().cloned().collect();
    let chain = if result.is_chain() {
        format!(
            "yes ({})",
            result.chain_reason().unwrap_or("no reason given")
        )
    } else {
        "no".to_string()
    };

    let mut findings = String::from("<ul>\n");
    for finding in result.raw_findings().findings() {
        let detail = match finding.status() {
            FindingStatus::Ok => finding.payload().map(payload_detail).unwrap_or_default(),
            FindingStatus::Failed | FindingStatus::TimedOut => format!(
                "<span class=\"failed\">{}</span>",
                escape(&negative_evidence(finding))
            ),
        };
        let _ = writeln!(
            findings,
            "        <li><strong>{}</strong> [{}] {detail}</li>",
            escape(finding.source()),
            finding.status()
        );
    }
    findings.push_str("      </ul>");

    format!(
        r"
    <section>
      <h2>Internal QA Signals</h2>
      <p><strong>Confidence:</strong> {confidence}</p>
      <p><strong>Rationale:</strong> {rationale}</p>
      <p><strong>Chain:</strong> {chain}</p>
      <p><strong>Oracle attempts:</strong> {attempts}</p>
      <h3>Checks Performed</h3>
      {checks}
      <h3>Findings</h3>
      {findings}
    </section>
",
        confidence = result.confidence().value(),
        rationale = escape(result.rationale()),
        chain = escape(&chain),
        attempts = result.oracle_attempts(),
        checks = render_list(&checks, "No check succeeded."),
    )
}

fn payload_detail(payload: &Value) -> String {
    let text = payload
        .get("summary")
        .and_then(Value::as_str)
        .map_or_else(|| payload.to_string(), str::to_string);
    let mut detail = escape(&text);
    if let Some(url) = payload.get("url").and_then(Value::as_str) {
        let _ = write!(detail, " ({})", link(url));
    }
    detail
}

const fn outcome_label(eligible: Eligibility) -> &'static str {
    match eligible {
        Eligibility::Yes => "Likely eligible",
        Eligibility::No => "Unlikely to be eligible",
        Eligibility::Indeterminate => "Needs review",
    }
}

const fn next_step(eligible: Eligibility) -> &'static str {
    match eligible {
        Eligibility::Yes => {
            "Gather the supporting documents below and file a claim before the deadline."
        },
        Eligibility::No => "No claim is recommended based on the available evidence.",
        Eligibility::Indeterminate => {
            "A reviewer will confirm eligibility before any claim is filed."
        },
    }
}

fn location(city: &str, state: &str) -> String {
    match (city.trim(), state.trim()) {
        ("", "") => "Unknown city".to_string(),
        ("", state) => state.to_string(),
        (city, "") => city.to_string(),
        (city, state) => format!("{city}, {state}"),
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn link(url: &str) -> String {
    let url = escape(url);
    format!("<a href=\"{url}\">{url}</a>")
}

fn render_list(items: &[String], empty_text: &str) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect();
    if items.is_empty() {
        return format!("<p>{}</p>", escape(empty_text));
    }
    let bullets: String = items
        .iter()
        .map(|item| format!("<li>{}</li>", escape(item)))
        .collect();
    format!("<ul>{bullets}</ul>")
}

/// Escapes text for HTML element and attribute content.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Default file name for a pack, e.g. `Lucky_Noodle_House_CLIENT.html`.
#[must_use]
pub fn default_file_name(business_name: &str, kind: PackKind) -> PathBuf {
    let slug: String = business_name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug = if slug.is_empty() {
        "evidence_pack".to_string()
    } else {
        slug
    };
    PathBuf::from(format!("{slug}_{}.html", kind.file_suffix()))
}

/// Writes `html` to `path`, creating parent directories.
pub fn write_pack(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))
}

/// Files written by [`write_dual_packs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualPacks {
    /// Client pack path.
    pub client: PathBuf,
    /// Internal pack path.
    pub internal: PathBuf,
}

/// Writes the client and internal packs for one candidate into `out_dir`.
pub fn write_dual_packs(
    out_dir: &Path,
    request: &VerificationRequest,
    result: &VerificationResult,
) -> Result<DualPacks> {
    write_dual_packs_at(out_dir, request, result, Utc::now())
}

fn write_dual_packs_at(
    out_dir: &Path,
    request: &VerificationRequest,
    result: &VerificationResult,
    generated_at: DateTime<Utc>,
) -> Result<DualPacks> {
    let write = |kind: PackKind| -> Result<PathBuf> {
        let path = out_dir.join(default_file_name(&request.subject.name, kind));
        write_pack(&path, &render_pack_at(request, result, kind, generated_at))?;
        Ok(path)
    };
    Ok(DualPacks {
        client: write(PackKind::Client)?,
        internal: write(PackKind::Internal)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use serde_json::json;
    use verity_core::{
        BoxFuture, Finding, Oracle, OracleError, SettlementRef, Subject, VerdictGenerator,
        consolidate,
    };

    use super::*;

    struct Canned(Mutex<VecDeque<String>>);

    impl Oracle for Canned {
        fn complete<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String, OracleError>> {
            let reply = self.0.lock().unwrap().pop_front().unwrap_or_default();
            Box::pin(async move { Ok(reply) })
        }
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new(
            Subject {
                name: "Lucky <Noodle> House".to_string(),
                city: "Wooster".to_string(),
                website: Some("https://luckynoodle.example".to_string()),
                ..Subject::default()
            },
            SettlementRef {
                settlement_name: "Grubhub Merchant Settlement".to_string(),
                summary: "Restaurants charged fees & listed without consent.".to_string(),
                eligible_actions: vec!["Listed on Grubhub".to_string()],
                proof_required: vec!["Grubhub invoices".to_string()],
                ..SettlementRef::default()
            },
        )
    }

    async fn result() -> VerificationResult {
        let bundle = consolidate(
            request(),
            vec![
                Finding::ok(
                    "platform_search",
                    json!({"summary": "Grubhub listing found", "url": "https://grubhub.example/x?a=1&b=2"}),
                ),
                Finding::failed("review_search", "request failed: HTTP 503"),
            ],
        );
        let oracle = Arc::new(Canned(Mutex::new(VecDeque::from([
            r#"{"eligible": "yes", "confidence": 81, "rationale": "Listed <script>alert(1)</script>", "is_chain": true, "chain_reason": "3 locations"}"#.to_string(),
        ]))));
        VerdictGenerator::new(oracle)
            .generate(Arc::new(bundle))
            .await
            .unwrap()
    }

    fn generated() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 0).unwrap()
    }

    #[tokio::test]
    async fn test_client_pack_hides_diagnostics() {
        let html = render_pack_at(&request(), &result().await, PackKind::Client, generated());

        assert!(html.contains("Settlement Evidence Pack (Client)"));
        assert!(html.contains("Generated: 2026-01-02 03:04 UTC"));
        assert!(html.contains("Outcome: Likely eligible"));
        assert!(html.contains("Confidence: high"));
        assert!(html.contains("Lucky &lt;Noodle&gt; House"));
        assert!(html.contains("fees &amp; listed"));
        assert!(html.contains("<li>Grubhub invoices</li>"));
        assert!(!html.contains("Internal QA Signals"));
        assert!(!html.contains("review_search"));
    }

    #[tokio::test]
    async fn test_internal_pack_includes_findings_and_escapes() {
        let html = render_pack_at(&request(), &result().await, PackKind::Internal, generated());

        assert!(html.contains("Internal QA Signals"));
        assert!(html.contains("<strong>Confidence:</strong> 81"));
        assert!(html.contains("Listed &lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("yes (3 locations)"));
        assert!(html.contains("<li>platform_search</li>"));
        assert!(html.contains("https://grubhub.example/x?a=1&amp;b=2"));
        assert!(html.contains("review_search lookup failed: request failed: HTTP 503"));
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(
            default_file_name("Lucky Noodle House, LLC", PackKind::Internal),
            PathBuf::from("Lucky_Noodle_House_LLC_INTERNAL.html")
        );
        assert_eq!(
            default_file_name("  ", PackKind::Client),
            PathBuf::from("evidence_pack_CLIENT.html")
        );
    }

    #[tokio::test]
    async fn test_write_pack_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packs/nested/pack.html");
        let html = render_pack(&request(), &result().await, PackKind::Client);

        write_pack(&path, &html).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<!doctype html>"));
    }

    #[tokio::test]
    async fn test_dual_packs_write_both_audiences() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("packs");

        let packs =
            write_dual_packs_at(&out_dir, &request(), &result().await, generated()).unwrap();

        assert_eq!(packs.client, out_dir.join("Lucky_Noodle_House_CLIENT.html"));
        assert_eq!(packs.internal, out_dir.join("Lucky_Noodle_House_INTERNAL.html"));
        let client = std::fs::read_to_string(&packs.client).unwrap();
        let internal = std::fs::read_to_string(&packs.internal).unwrap();
        assert_ne!(client, internal);
        assert!(client.contains("Settlement Evidence Pack (Client)"));
        assert!(!client.contains("Internal QA Signals"));
        assert!(internal.contains("Settlement Evidence Pack (Internal)"));
        assert!(internal.contains("Internal QA Signals"));
        assert!(internal.contains("review_search lookup failed"));
    }
}
