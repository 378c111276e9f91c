//! Reasoning prompt rendering.

use crate::evidence::EvidenceBundle;
use crate::verdict::SchemaViolation;

/// Response contract stated to the oracle.
pub const RESPONSE_CONTRACT: &str = r#"Return ONLY a JSON object with exactly these keys:
  "eligible": "yes" | "no" | "indeterminate"
  "confidence": integer 0-100
  "rationale": non-empty string explaining which signals drove the decision
  "is_chain": boolean
  "chain_reason": string or null"#;

/// Renders the single reasoning request for `bundle`.
#[must_use]
pub fn render_prompt(bundle: &EvidenceBundle) -> String {
    let request = bundle.request();
    let settlement = &request.settlement;
    let subject = &request.subject;

    format!(
        "You are a verification analyst for a small-business settlement matching service.

SETTLEMENT CONTEXT:
  Name: {settlement_name}
  Defendant: {defendant}
  Summary: {summary}
  Eligible class: {eligible_class}
  Eligible actions: {actions}
  Eligible industries: {industries}
  Eligible geography: {geography}
  Eligible time period: {time_period}
  Exclusions: {exclusions}

BUSINESS:
  Name: {name}
  Category: {category}
  Address: {address}, {city}, {state}
  Website: {website}

RESEARCH FINDINGS:
{findings}
NOTES:
- Findings marked [failed] or [timed_out] mean the signal is missing, not that it is negative.
- An archive CONTINUITY GAP means the domain predates the business; use the identity date, not the domain date, for how long the business has existed.
- Use \"indeterminate\" when the evidence cannot support a yes or no.

TASK:
Decide whether this business is likely eligible for this settlement.
{contract}
",
        settlement_name = or_unknown(&settlement.settlement_name),
        defendant = or_unknown(&settlement.defendant),
        summary = settlement.summary,
        eligible_class = settlement.eligible_class_description,
        actions = settlement.eligible_actions.join(", "),
        industries = settlement.eligible_industries.join(", "),
        geography = settlement.eligible_geography.as_deref().unwrap_or(""),
        time_period = settlement.eligible_time_period.as_deref().unwrap_or(""),
        exclusions = settlement.exclusions.join(", "),
        name = subject.name,
        category = subject.category.as_deref().unwrap_or("Unknown"),
        address = subject.address.as_deref().unwrap_or(""),
        city = subject.city,
        state = subject.state,
        website = subject.website().unwrap_or("None"),
        findings = bundle.render_findings(),
        contract = RESPONSE_CONTRACT,
    )
}

/// Appends the previous attempt's violation so the oracle can correct it.
#[must_use]
pub fn with_feedback(prompt: &str, violation: &SchemaViolation) -> String {
    format!(
        "{prompt}\nYOUR PREVIOUS RESPONSE WAS REJECTED: {violation}.\n\
         Respond again with only the JSON object described above.\n"
    )
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}
