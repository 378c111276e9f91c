//! Findings consolidation.
//!
//! Turns the executor's ordered findings into one [`EvidenceBundle`]:
//!
//! 1. dispatch order is preserved so prompts are reproducible;
//! 2. a finding repeating the exact content of an earlier finding from the
//!    same source is dropped;
//! 3. failed and timed-out findings are kept as negative evidence so the
//!    oracle can reason about a missing signal.
//!
//! Pure transformation; no I/O, no suspension.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::finding::{Finding, FindingStatus};
use crate::request::VerificationRequest;

/// Ordered, deduplicated findings plus the subject and settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceBundle {
    request: VerificationRequest,
    findings: Vec<Finding>,
}

/// Builds the evidence bundle for one verification.
#[must_use]
pub fn consolidate(request: VerificationRequest, findings: Vec<Finding>) -> EvidenceBundle {
    let mut seen = HashSet::new();
    let findings = findings
        .into_iter()
        .filter(|finding| seen.insert(content_key(finding)))
        .collect();
    EvidenceBundle { request, findings }
}

fn content_key(finding: &Finding) -> (String, [u8; 32]) {
    let mut hasher = Sha256::new();
    hasher.update(finding.status().as_str().as_bytes());
    hasher.update([0]);
    if let Some(payload) = finding.payload() {
        hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    }
    hasher.update([0]);
    if let Some(message) = finding.error_message() {
        hasher.update(message.as_bytes());
    }
    (finding.source().to_string(), hasher.finalize().into())
}

impl EvidenceBundle {
    /// Subject and settlement under verification.
    #[must_use]
    pub const fn request(&self) -> &VerificationRequest {
        &self.request
    }

    /// Findings in dispatch order.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Names of sources whose lookup succeeded.
    #[must_use]
    pub fn ok_sources(&self) -> BTreeSet<String> {
        self.findings
            .iter()
            .filter(|finding| finding.is_ok())
            .map(|finding| finding.source().to_string())
            .collect()
    }

    /// Names of every source represented, in dispatch order.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.findings
            .iter()
            .map(Finding::source)
            .filter(|source| seen.insert(*source))
            .collect()
    }

    /// Renders the findings section of the reasoning prompt.
    #[must_use]
    pub fn render_findings(&self) -> String {
        let mut out = String::new();
        for (index, finding) in self.findings.iter().enumerate() {
            let _ = writeln!(
                out,
                "\n--- Finding {} ({}) [{}] ---",
                index + 1,
                finding.source(),
                finding.status()
            );
            match finding.status() {
                FindingStatus::Ok => {
                    if let Some(payload) = finding.payload() {
                        render_payload(&mut out, payload);
                    }
                },
                FindingStatus::Failed | FindingStatus::TimedOut => {
                    let _ = writeln!(out, "{}", negative_evidence(finding));
                },
            }
        }
        out
    }
}

/// One-line description of a missing signal.
#[must_use]
pub fn negative_evidence(finding: &Finding) -> String {
    let reason = finding.error_message().unwrap_or("no detail");
    match finding.status() {
        FindingStatus::TimedOut => format!(
            "{} lookup timed out ({reason}); treat this signal as unavailable, not negative.",
            finding.source()
        ),
        _ => format!(
            "{} lookup failed: {reason}; treat this signal as unavailable, not negative.",
            finding.source()
        ),
    }
}

fn render_payload(out: &mut String, payload: &Value) {
    if let Some(url) = payload.get("url").and_then(Value::as_str) {
        let _ = writeln!(out, "URL: {url}");
    }
    match payload.get("summary").and_then(Value::as_str) {
        Some(summary) => {
            let _ = writeln!(out, "{summary}");
        },
        None => {
            let text = serde_json::to_string_pretty(payload).unwrap_or_default();
            let _ = writeln!(out, "{text}");
        },
    }
}
