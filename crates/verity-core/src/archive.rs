//! Archive captures and temporal identity reconciliation.
//!
//! A domain's earliest archive capture says how long the *domain* has been
//! around, not how long the *business* has. Domains change hands, so the
//! reconciler looks for the earliest capture whose content is consistent
//! with the claimed identity and reports both dates, plus the gap between
//! them, instead of collapsing them into a single "first seen".
//!
//! # Identity Matching
//!
//! Captures carry a claim-independent [`ContentSignature`]. The claim
//! ([`IdentityClaim`]) scores a signature:
//!
//! ```text
//! score  = 0.7                        full business-name phrase present
//!        | 0.6 * token_hits / tokens  otherwise
//!        + 0.2                        city present
//!        + 0.1                        >= 2 name tokens present
//! score  = min(score, 1.0)
//! ```
//!
//! Tokens are name words of at least four characters that are not generic
//! stopwords. Only captures whose [`UrlState`] is `Active` can match.
//!
//! # Invariants
//!
//! - [INV-ARC-001] `identity_first_seen >= domain_first_seen`.
//! - [INV-ARC-002] No match means `Continuity::Indeterminate`; the identity
//!   date is never defaulted to the domain date.
//! - [INV-ARC-003] A positive gap is always labeled in the payload.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::{DEFAULT_IDENTITY_MATCH_THRESHOLD, DEFAULT_MATERIAL_GAP_DAYS};

/// Maximum normalized text retained per signature.
pub const MAX_SIGNATURE_CHARS: usize = 7_000;

/// Wording that suggests the site changed hands.
const OWNER_CHANGE_MARKERS: &[&str] = &[
    "under new ownership",
    "new ownership",
    "formerly",
    "now known as",
    "rebranded",
    "acquired",
];

/// Wording typical of parked or for-sale domains.
const PARKED_MARKERS: &[&str] = &[
    "this domain is for sale",
    "buy this domain",
    "domain may be for sale",
    "parked free",
    "domain parking",
];

/// Name words that carry no identity.
const TOKEN_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "your", "you", "our", "llc", "inc", "co",
    "company", "ltd", "group", "services", "service",
];

// =============================================================================
// Captures
// =============================================================================

/// What the archived URL was doing at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    /// Serving its own content.
    Active,
    /// Redirecting elsewhere.
    Redirect,
    /// Parked or listed for sale.
    Parked,
}

impl UrlState {
    /// Classifies a capture from its HTTP status and page text.
    #[must_use]
    pub fn classify(status_code: u16, page_text: &str) -> Self {
        if (300..400).contains(&status_code) {
            return Self::Redirect;
        }
        let lower = page_text.to_lowercase();
        if PARKED_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Self::Parked;
        }
        Self::Active
    }
}

/// Claim-independent fingerprint of a captured page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSignature {
    normalized: String,
    owner_change_wording: bool,
}

impl ContentSignature {
    /// Fingerprints extracted page text.
    #[must_use]
    pub fn from_text(page_text: &str) -> Self {
        let lower = page_text.to_lowercase();
        let owner_change_wording = OWNER_CHANGE_MARKERS
            .iter()
            .any(|marker| lower.contains(marker));
        let mut normalized = normalize(&lower);
        if normalized.len() > MAX_SIGNATURE_CHARS {
            let mut cut = MAX_SIGNATURE_CHARS;
            while !normalized.is_char_boundary(cut) {
                cut -= 1;
            }
            normalized.truncate(cut);
        }
        Self {
            normalized,
            owner_change_wording,
        }
    }

    /// Returns `true` if no text survived normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Returns `true` if the page mentions an ownership change.
    #[must_use]
    pub const fn owner_change_wording(&self) -> bool {
        self.owner_change_wording
    }

    fn contains_phrase(&self, phrase: &str) -> bool {
        !phrase.is_empty() && format!(" {} ", self.normalized).contains(&format!(" {phrase} "))
    }

    fn words(&self) -> BTreeSet<&str> {
        self.normalized.split(' ').collect()
    }
}

/// One snapshot of a domain at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCapture {
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Redirect / parked / active indicator.
    pub url_state: UrlState,
    /// Fingerprint of the captured content.
    pub content_signature: ContentSignature,
    /// Viewer URL for the snapshot, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
}

/// Captures for one domain, as carried in the archive finding before
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    /// Bare host the captures belong to.
    pub domain: String,
    /// Captures, chronologically ordered.
    pub captures: Vec<ArchiveCapture>,
}

// =============================================================================
// Claim
// =============================================================================

/// The business identity a capture is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    phrase: String,
    tokens: Vec<String>,
    city: String,
}

impl IdentityClaim {
    /// Builds a claim from a business name and city.
    #[must_use]
    pub fn new(business_name: &str, city: &str) -> Self {
        let phrase = normalize(&business_name.to_lowercase());
        let tokens = phrase
            .split(' ')
            .filter(|token| token.len() >= 4 && !TOKEN_STOPWORDS.contains(token))
            .map(str::to_string)
            .collect();
        Self {
            phrase,
            tokens,
            city: normalize(&city.to_lowercase()),
        }
    }

    /// Scores how consistent `signature` is with this identity, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // token counts are tiny
    pub fn score(&self, signature: &ContentSignature) -> f64 {
        if self.phrase.is_empty() {
            return 0.0;
        }

        let words = signature.words();
        let token_hits = self
            .tokens
            .iter()
            .filter(|token| words.contains(token.as_str()))
            .count();
        let token_ratio = token_hits as f64 / self.tokens.len().max(1) as f64;

        let mut score = if signature.contains_phrase(&self.phrase) {
            0.7
        } else {
            0.6 * token_ratio
        };
        if signature.contains_phrase(&self.city) {
            score += 0.2;
        }
        if token_hits >= 2 {
            score += 0.1;
        }
        score.min(1.0)
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Thresholds applied by [`reconcile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilePolicy {
    /// Minimum score for a capture to match the claim.
    pub match_threshold: f64,
    /// Gap at or above which an ownership change is material.
    pub material_gap: TimeDelta,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_IDENTITY_MATCH_THRESHOLD,
            material_gap: TimeDelta::days(DEFAULT_MATERIAL_GAP_DAYS),
        }
    }
}

/// Relationship between domain age and business-identity age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// The earliest capture already shows the claimed business.
    Coincident,
    /// The business appears later than the domain.
    Gap {
        /// Gap meets the configured material threshold.
        material: bool,
    },
    /// No capture matched the claimed identity.
    Indeterminate,
}

impl Continuity {
    /// Wire label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Coincident => "coincident",
            Self::Gap { .. } => "gap",
            Self::Indeterminate => "indeterminate",
        }
    }
}

/// Output of the temporal identity reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityWindow {
    /// Earliest capture of the domain, regardless of owner.
    pub domain_first_seen: DateTime<Utc>,
    /// Earliest capture matching the claimed identity.
    pub identity_first_seen: Option<DateTime<Utc>>,
    /// `identity_first_seen - domain_first_seen`.
    pub continuity_gap: Option<TimeDelta>,
    /// Continuity label.
    pub continuity: Continuity,
    /// Captures considered.
    pub captures_examined: usize,
    /// Non-matching captures before the first match.
    pub unmatched_before_identity: usize,
    /// Share of captures at or after the first match that also match.
    pub continuity_ratio: Option<f64>,
    /// Captures carrying ownership-change wording.
    pub owner_change_captures: usize,
    /// Viewer URL of the first matching capture.
    pub identity_snapshot_url: Option<String>,
}

/// Reconciliation could not start.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The capture sequence was empty.
    #[error("no archive captures to reconcile")]
    NoCaptures,
}

/// Computes the identity window for one domain's captures.
///
/// Captures are ordered by timestamp before scanning, so an out-of-order
/// input cannot produce an identity date earlier than the domain date.
pub fn reconcile(
    captures: &[ArchiveCapture],
    claim: &IdentityClaim,
    policy: &ReconcilePolicy,
) -> Result<IdentityWindow, ReconcileError> {
    let mut ordered: Vec<&ArchiveCapture> = captures.iter().collect();
    ordered.sort_by_key(|capture| capture.timestamp);

    let first = ordered.first().ok_or(ReconcileError::NoCaptures)?;
    let domain_first_seen = first.timestamp;

    let matched: Vec<bool> = ordered
        .iter()
        .map(|capture| {
            capture.url_state == UrlState::Active
                && claim.score(&capture.content_signature) >= policy.match_threshold
        })
        .collect();
    let owner_change_captures = ordered
        .iter()
        .filter(|capture| capture.content_signature.owner_change_wording())
        .count();

    let Some(first_match) = matched.iter().position(|&hit| hit) else {
        debug!(
            captures = ordered.len(),
            "no capture matched the claimed identity"
        );
        return Ok(IdentityWindow {
            domain_first_seen,
            identity_first_seen: None,
            continuity_gap: None,
            continuity: Continuity::Indeterminate,
            captures_examined: ordered.len(),
            unmatched_before_identity: ordered.len(),
            continuity_ratio: None,
            owner_change_captures,
            identity_snapshot_url: None,
        });
    };

    let identity_capture = ordered[first_match];
    let identity_first_seen = identity_capture.timestamp;
    let gap = identity_first_seen - domain_first_seen;
    // Coincident only when the earliest capture itself matches; a later
    // capture sharing its timestamp is still a (zero-day) gap.
    let continuity = if first_match == 0 {
        Continuity::Coincident
    } else {
        Continuity::Gap {
            material: gap > TimeDelta::zero() && gap >= policy.material_gap,
        }
    };

    let tail = &matched[first_match..];
    #[allow(clippy::cast_precision_loss)]
    let continuity_ratio = tail.iter().filter(|&&hit| hit).count() as f64 / tail.len() as f64;

    Ok(IdentityWindow {
        domain_first_seen,
        identity_first_seen: Some(identity_first_seen),
        continuity_gap: Some(gap),
        continuity,
        captures_examined: ordered.len(),
        unmatched_before_identity: first_match,
        continuity_ratio: Some(continuity_ratio),
        owner_change_captures,
        identity_snapshot_url: identity_capture.snapshot_url.clone(),
    })
}

impl IdentityWindow {
    /// Plain-English summary for the reasoning prompt.
    #[must_use]
    pub fn summary(&self, domain: &str) -> String {
        let domain_date = self.domain_first_seen.date_naive();
        let Some(identity_first_seen) = self.identity_first_seen else {
            let mut text = format!(
                "Archive captures exist for {domain} since {domain_date}, but no capture \
                 matched the claimed business identity; continuity is INDETERMINATE \
                 (possible domain reuse or owner change)."
            );
            if self.owner_change_captures > 0 {
                text.push_str(" Ownership-change wording appears in archived pages.");
            }
            return text;
        };

        let mut text = format!(
            "Domain {domain} first captured {domain_date}. Earliest capture matching the \
             claimed business identity: {}.",
            identity_first_seen.date_naive()
        );
        match self.continuity {
            Continuity::Gap { material } => {
                let days = self.continuity_gap.map_or(0, |gap| gap.num_days());
                text.push_str(&format!(
                    " CONTINUITY GAP of {days} days between domain and business identity \
                     ({}); the domain likely had a prior owner.",
                    if material { "material" } else { "below material threshold" }
                ));
            },
            Continuity::Coincident => {
                text.push_str(" Domain and business identity appear together.");
            },
            Continuity::Indeterminate => {},
        }
        if let Some(ratio) = self.continuity_ratio {
            text.push_str(&format!(
                " Continuity score {ratio:.2} across {} captures.",
                self.captures_examined - self.unmatched_before_identity
            ));
        }
        if self.owner_change_captures > 0 {
            text.push_str(" Ownership-change wording appears in archived pages.");
        }
        text
    }

    /// Archive finding payload, with the continuity label spelled out.
    #[must_use]
    pub fn to_payload(&self, domain: &str) -> Value {
        let material_gap = match self.continuity {
            Continuity::Gap { material } => Some(material),
            _ => None,
        };
        json!({
            "domain": domain,
            "summary": self.summary(domain),
            "url": self.identity_snapshot_url,
            "domain_first_seen": self.domain_first_seen.to_rfc3339(),
            "identity_first_seen": self.identity_first_seen.map(|ts| ts.to_rfc3339()),
            "continuity": self.continuity.label(),
            "continuity_gap_days": self.continuity_gap.map(|gap| gap.num_days()),
            "material_gap": material_gap,
            "continuity_ratio": self.continuity_ratio,
            "captures_examined": self.captures_examined,
            "unmatched_before_identity": self.unmatched_before_identity,
            "owner_change_captures": self.owner_change_captures,
        })
    }
}

/// Payload for a domain with no captures at all.
#[must_use]
pub fn no_captures_payload(domain: &str) -> Value {
    json!({
        "domain": domain,
        "summary": format!("The archive has no HTML captures for {domain}."),
        "continuity": "no_captures",
    })
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalizes a website URL to a bare lower-case host without `www.`.
#[must_use]
pub fn domain_from_website(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    (!host.is_empty()).then_some(host)
}

/// Picks at most `max` chronological rows, always keeping the earliest few
/// and the latest.
#[must_use]
pub fn sample_captures<T: Clone>(rows: &[T], max: usize) -> Vec<T> {
    if max == 0 {
        return Vec::new();
    }
    if rows.len() <= max {
        return rows.to_vec();
    }
    let last = rows.len() - 1;
    // Seeds in priority order: latest first, then the earliest three.
    let mut picked: BTreeSet<usize> = BTreeSet::new();
    for idx in [last, 0, 1, 2] {
        if picked.len() >= max {
            break;
        }
        picked.insert(idx);
    }
    let step = (last / max.saturating_sub(1).max(1)).max(1);
    for idx in (0..rows.len()).step_by(step) {
        if picked.len() >= max {
            break;
        }
        picked.insert(idx);
    }
    picked.into_iter().map(|idx| rows[idx].clone()).collect()
}

fn normalize(lower: &str) -> String {
    lower
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
