//! Verification subject and settlement reference.

use serde::{Deserialize, Serialize};

/// The business whose eligibility is being verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Business name as claimed.
    pub name: String,
    /// City the business operates in.
    #[serde(default)]
    pub city: String,
    /// Two-letter state code.
    #[serde(default = "default_state")]
    pub state: String,
    /// Business category (e.g. "restaurant").
    #[serde(default)]
    pub category: Option<String>,
    /// Street address.
    #[serde(default)]
    pub address: Option<String>,
    /// Business website, if known.
    #[serde(default)]
    pub website: Option<String>,
}

fn default_state() -> String {
    "OH".to_string()
}

impl Subject {
    /// Website with surrounding whitespace removed, or `None` if blank.
    #[must_use]
    pub fn website(&self) -> Option<&str> {
        self.website
            .as_deref()
            .map(str::trim)
            .filter(|site| !site.is_empty())
    }
}

/// The settlement the claim is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementRef {
    /// Settlement name.
    pub settlement_name: String,
    /// Defendant in the underlying case.
    pub defendant: String,
    /// Short plain-English summary.
    pub summary: String,
    /// Who qualifies.
    pub eligible_class_description: String,
    /// Actions the business must have taken.
    pub eligible_actions: Vec<String>,
    /// Industries that may qualify.
    pub eligible_industries: Vec<String>,
    /// Geographic restriction.
    pub eligible_geography: Option<String>,
    /// Qualifying time period.
    pub eligible_time_period: Option<String>,
    /// Who is excluded.
    pub exclusions: Vec<String>,
    /// Documents needed to file a claim.
    pub proof_required: Vec<String>,
    /// Claim deadline.
    pub claim_deadline: Option<String>,
    /// Where to file.
    pub claim_url: Option<String>,
    /// How to file: online, mail or both.
    pub claim_method: Option<String>,
}

impl SettlementRef {
    /// Returns `true` if the settlement name or defendant mentions any of
    /// `keywords` (case-insensitive).
    #[must_use]
    pub fn mentions_any(&self, keywords: &[&str]) -> bool {
        let name = self.settlement_name.to_lowercase();
        let defendant = self.defendant.to_lowercase();
        keywords
            .iter()
            .any(|kw| name.contains(kw) || defendant.contains(kw))
    }
}

/// One business x settlement candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Business being verified.
    pub subject: Subject,
    /// Settlement reference.
    pub settlement: SettlementRef,
}

impl VerificationRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(subject: Subject, settlement: SettlementRef) -> Self {
        Self {
            subject,
            settlement,
        }
    }
}
