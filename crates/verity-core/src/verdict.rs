//! Verdict generation against the reasoning oracle.
//!
//! # Protocol
//!
//! ```text
//! generate(bundle)
//!     |-- prompt = render_prompt(bundle)
//!     |-- loop attempt = 1..=1 + max_retries
//!     |       text = oracle.complete(prompt)      transport error -> Err(Oracle)
//!     |       parse_verdict(text)
//!     |           Ok(verdict)      -> VerificationResult
//!     |           Err(violation)   -> remember; next prompt carries feedback
//!     `-- Err(Exhausted { attempts, last_violation })
//! ```
//!
//! # Trust Boundary
//!
//! [`parse_verdict`] is the only way oracle text becomes a typed value. It
//! yields either a fully populated [`OracleVerdict`] or a [`SchemaViolation`];
//! no partially valid verdict is ever constructed.
//!
//! `checks_performed` is never taken from the oracle. It is derived from the
//! bundle's successful findings so evidence coverage cannot be over-claimed.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::config::DEFAULT_VERDICT_RETRIES;
use crate::evidence::EvidenceBundle;
use crate::prompt::{render_prompt, with_feedback};

// =============================================================================
// Oracle contract
// =============================================================================

/// External reasoning oracle.
pub trait Oracle: Send + Sync {
    /// Answers a rendered evidence prompt with free text.
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, OracleError>>;
}

/// Transport-level oracle failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum OracleError {
    /// The request could not be delivered or answered.
    #[error("oracle request failed: {0}")]
    Transport(String),

    /// The provider rejected the request.
    #[error("oracle rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The provider answered without any text content.
    #[error("oracle returned no content")]
    EmptyResponse,
}

// =============================================================================
// Schema
// =============================================================================

/// Tri-state eligibility judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Evidence supports eligibility.
    Yes,
    /// Evidence contradicts eligibility.
    No,
    /// Evidence is too weak to decide.
    Indeterminate,
}

impl Eligibility {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Indeterminate => "indeterminate",
        }
    }
}

/// Confidence on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Confidence(u8);

impl Confidence {
    /// Upper bound of the scale.
    pub const MAX: u8 = 100;

    /// Returns `None` if `value` exceeds [`Confidence::MAX`].
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value > Self::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Raw value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Coarse band for client-facing text.
    #[must_use]
    pub const fn band(self) -> &'static str {
        match self.0 {
            75..=100 => "high",
            45..=74 => "moderate",
            _ => "low",
        }
    }
}

/// Why an oracle response was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaViolation {
    /// The text is not JSON.
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    /// The JSON does not have the required shape.
    #[error("response does not match the verdict schema: {0}")]
    Shape(String),

    /// Confidence outside 0-100.
    #[error("confidence must be an integer in 0-100, got {0}")]
    ConfidenceOutOfRange(i64),

    /// Rationale missing or blank.
    #[error("rationale must not be empty")]
    EmptyRationale,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    eligible: Eligibility,
    confidence: i64,
    rationale: String,
    #[serde(default)]
    is_chain: Option<bool>,
    #[serde(default)]
    chain_reason: Option<String>,
}

/// A fully validated oracle answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleVerdict {
    /// Eligibility judgment.
    pub eligible: Eligibility,
    /// Confidence.
    pub confidence: Confidence,
    /// Rationale text.
    pub rationale: String,
    /// Business appears to be a chain.
    pub is_chain: bool,
    /// Why it was flagged as a chain.
    pub chain_reason: Option<String>,
}

/// Parses and validates oracle text against the verdict schema.
pub fn parse_verdict(text: &str) -> Result<OracleVerdict, SchemaViolation> {
    let body = strip_code_fences(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| SchemaViolation::NotJson(e.to_string()))?;
    if !value.is_object() {
        return Err(SchemaViolation::Shape("expected a JSON object".to_string()));
    }
    let raw: RawVerdict =
        serde_json::from_value(value).map_err(|e| SchemaViolation::Shape(e.to_string()))?;

    let confidence = u8::try_from(raw.confidence)
        .ok()
        .and_then(Confidence::new)
        .ok_or(SchemaViolation::ConfidenceOutOfRange(raw.confidence))?;
    let rationale = raw.rationale.trim().to_string();
    if rationale.is_empty() {
        return Err(SchemaViolation::EmptyRationale);
    }

    Ok(OracleVerdict {
        eligible: raw.eligible,
        confidence,
        rationale,
        is_chain: raw.is_chain.unwrap_or(false),
        chain_reason: raw
            .chain_reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty()),
    })
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop the info string (e.g. "json"), on its own line or glued to the body.
    let body = match rest.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with(['{', '[']) => body,
        _ => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim()
}

// =============================================================================
// Result
// =============================================================================

/// Typed output of a verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    eligible: Eligibility,
    confidence: Confidence,
    rationale: String,
    is_chain: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_reason: Option<String>,
    checks_performed: BTreeSet<String>,
    oracle_attempts: u32,
    #[serde(skip)]
    raw_findings: Arc<EvidenceBundle>,
}

impl VerificationResult {
    fn from_verdict(verdict: OracleVerdict, bundle: Arc<EvidenceBundle>, attempts: u32) -> Self {
        Self {
            eligible: verdict.eligible,
            confidence: verdict.confidence,
            rationale: verdict.rationale,
            is_chain: verdict.is_chain,
            chain_reason: verdict.chain_reason,
            checks_performed: bundle.ok_sources(),
            oracle_attempts: attempts,
            raw_findings: bundle,
        }
    }

    /// Eligibility judgment.
    #[must_use]
    pub const fn eligible(&self) -> Eligibility {
        self.eligible
    }

    /// Confidence.
    #[must_use]
    pub const fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// Rationale text.
    #[must_use]
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Business appears to be a chain.
    #[must_use]
    pub const fn is_chain(&self) -> bool {
        self.is_chain
    }

    /// Why it was flagged as a chain.
    #[must_use]
    pub fn chain_reason(&self) -> Option<&str> {
        self.chain_reason.as_deref()
    }

    /// Sources whose lookups succeeded and fed the verdict.
    #[must_use]
    pub const fn checks_performed(&self) -> &BTreeSet<String> {
        &self.checks_performed
    }

    /// Oracle calls made, including the successful one.
    #[must_use]
    pub const fn oracle_attempts(&self) -> u32 {
        self.oracle_attempts
    }

    /// Retries that were needed after schema violations.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.oracle_attempts.saturating_sub(1)
    }

    /// Evidence the verdict was based on (internal audience only).
    #[must_use]
    pub fn raw_findings(&self) -> &EvidenceBundle {
        &self.raw_findings
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Verdict generation failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerdictGenerationError {
    /// Every attempt failed schema validation.
    #[error("oracle output failed validation after {attempts} attempts: {last_violation}")]
    Exhausted {
        /// Oracle calls made.
        attempts: u32,
        /// Violation of the final attempt.
        last_violation: SchemaViolation,
    },

    /// The oracle could not be reached.
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Drives the oracle to a schema-valid verdict with bounded retry.
pub struct VerdictGenerator {
    oracle: Arc<dyn Oracle>,
    max_retries: u32,
    feedback: bool,
}

impl std::fmt::Debug for VerdictGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictGenerator")
            .field("max_retries", &self.max_retries)
            .field("feedback", &self.feedback)
            .finish_non_exhaustive()
    }
}

impl VerdictGenerator {
    /// Creates a generator with the default retry bound and feedback on.
    #[must_use]
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            max_retries: DEFAULT_VERDICT_RETRIES,
            feedback: true,
        }
    }

    /// Set the number of additional attempts after a violation.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Enable or disable appending the last violation to retries.
    #[must_use]
    pub const fn with_feedback(mut self, enabled: bool) -> Self {
        self.feedback = enabled;
        self
    }

    /// Produces a schema-valid result for `bundle`.
    ///
    /// # Errors
    ///
    /// - [`VerdictGenerationError::Oracle`] on a transport failure
    /// - [`VerdictGenerationError::Exhausted`] when `1 + max_retries`
    ///   responses all fail validation
    pub async fn generate(
        &self,
        bundle: Arc<EvidenceBundle>,
    ) -> Result<VerificationResult, VerdictGenerationError> {
        let base_prompt = render_prompt(&bundle);
        let max_attempts = self.max_retries.saturating_add(1);
        let mut last_violation: Option<SchemaViolation> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let prompt = match (&last_violation, self.feedback) {
                (Some(violation), true) => with_feedback(&base_prompt, violation),
                _ => base_prompt.clone(),
            };

            debug!(attempt, prompt_bytes = prompt.len(), "invoking reasoning oracle");
            let text = self.oracle.complete(&prompt).await?;

            match parse_verdict(&text) {
                Ok(verdict) => {
                    info!(
                        attempt,
                        eligible = verdict.eligible.as_str(),
                        confidence = verdict.confidence.value(),
                        "oracle verdict accepted"
                    );
                    return Ok(VerificationResult::from_verdict(verdict, bundle, attempt));
                },
                Err(violation) if attempt >= max_attempts => {
                    warn!(attempt, %violation, "oracle retries exhausted");
                    return Err(VerdictGenerationError::Exhausted {
                        attempts: attempt,
                        last_violation: violation,
                    });
                },
                Err(violation) => {
                    warn!(attempt, %violation, "oracle response failed schema validation");
                    last_violation = Some(violation);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::evidence::consolidate;
    use crate::finding::Finding;
    use crate::request::VerificationRequest;

    const VALID: &str = r#"{"eligible": "yes", "confidence": 82, "rationale": "Listed on the platform during the class period.", "is_chain": false, "chain_reason": null}"#;

    struct ScriptedOracle {
        replies: Mutex<VecDeque<Result<String, OracleError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<String, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl Oracle for ScriptedOracle {
        fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, OracleError>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("not json".to_string()));
            Box::pin(async move { reply })
        }
    }

    fn bundle() -> Arc<EvidenceBundle> {
        Arc::new(consolidate(
            VerificationRequest::default(),
            vec![
                Finding::ok("business_website", json!({"summary": "site"})),
                Finding::ok("platform_search", json!({"summary": "listing"})),
                Finding::failed("review_search", "boom"),
            ],
        ))
    }

    #[test]
    fn test_parse_valid() {
        let verdict = parse_verdict(VALID).unwrap();
        assert_eq!(verdict.eligible, Eligibility::Yes);
        assert_eq!(verdict.confidence.value(), 82);
        assert!(!verdict.is_chain);
        assert_eq!(verdict.chain_reason, None);
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_verdict(&fenced).is_ok());
        let bare = format!("```\n{VALID}\n```");
        assert!(parse_verdict(&bare).is_ok());
        let inline = format!("```json{VALID}```");
        assert!(parse_verdict(&inline).is_ok());
        let inline_bare = format!("``` {VALID} ```");
        assert!(parse_verdict(&inline_bare).is_ok());
        let multiline = "```{\n\"eligible\": \"no\", \"confidence\": 20, \"rationale\": \"closed\"\n}```";
        assert!(parse_verdict(multiline).is_ok());
    }

    #[test]
    fn test_parse_nulls_take_defaults() {
        let verdict = parse_verdict(
            r#"{"eligible": "indeterminate", "confidence": 10, "rationale": "thin", "is_chain": null}"#,
        )
        .unwrap();
        assert!(!verdict.is_chain);
    }

    #[test]
    fn test_parse_rejections() {
        assert!(matches!(
            parse_verdict("The business looks eligible."),
            Err(SchemaViolation::NotJson(_))
        ));
        assert!(matches!(
            parse_verdict("[1, 2]"),
            Err(SchemaViolation::Shape(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"eligible": "likely", "confidence": 50, "rationale": "x"}"#),
            Err(SchemaViolation::Shape(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"eligible": "yes", "rationale": "x"}"#),
            Err(SchemaViolation::Shape(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"eligible": "yes", "confidence": 70.5, "rationale": "x"}"#),
            Err(SchemaViolation::Shape(_))
        ));
        assert_eq!(
            parse_verdict(r#"{"eligible": "no", "confidence": 140, "rationale": "x"}"#),
            Err(SchemaViolation::ConfidenceOutOfRange(140))
        );
        assert_eq!(
            parse_verdict(r#"{"eligible": "no", "confidence": -1, "rationale": "x"}"#),
            Err(SchemaViolation::ConfidenceOutOfRange(-1))
        );
        assert_eq!(
            parse_verdict(r#"{"eligible": "no", "confidence": 5, "rationale": "   "}"#),
            Err(SchemaViolation::EmptyRationale)
        );
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(Confidence::new(101), None);
        assert_eq!(Confidence::new(90).unwrap().band(), "high");
        assert_eq!(Confidence::new(50).unwrap().band(), "moderate");
        assert_eq!(Confidence::new(10).unwrap().band(), "low");
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let oracle = ScriptedOracle::new(vec![Ok(VALID.to_string())]);
        let result = VerdictGenerator::new(oracle.clone())
            .generate(bundle())
            .await
            .unwrap();

        assert_eq!(result.oracle_attempts(), 1);
        assert_eq!(result.retries(), 0);
        assert_eq!(oracle.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_two_malformed_responses() {
        let oracle = ScriptedOracle::new(vec![
            Ok("Sure! Here is my answer.".to_string()),
            Ok(r#"{"eligible": "maybe"}"#.to_string()),
            Ok(VALID.to_string()),
        ]);
        let result = VerdictGenerator::new(oracle.clone())
            .generate(bundle())
            .await
            .unwrap();

        assert_eq!(result.retries(), 2);
        assert_eq!(result.eligible(), Eligibility::Yes);

        let prompts = oracle.prompts();
        assert!(!prompts[0].contains("REJECTED"));
        assert!(prompts[1].contains("REJECTED: response is not valid JSON"));
        assert!(prompts[2].contains("REJECTED: response does not match the verdict schema"));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_violation() {
        let oracle = ScriptedOracle::new(vec![
            Ok("nope".to_string()),
            Ok("still nope".to_string()),
            Ok(r#"{"eligible": "no", "confidence": 500, "rationale": "x"}"#.to_string()),
            Ok(VALID.to_string()),
        ]);
        let err = VerdictGenerator::new(oracle.clone())
            .generate(bundle())
            .await
            .unwrap_err();

        match err {
            VerdictGenerationError::Exhausted {
                attempts,
                last_violation,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_violation, SchemaViolation::ConfidenceOutOfRange(500));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(oracle.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_feedback_can_be_disabled() {
        let oracle = ScriptedOracle::new(vec![Ok("nope".to_string()), Ok(VALID.to_string())]);
        VerdictGenerator::new(oracle.clone())
            .with_feedback(false)
            .generate(bundle())
            .await
            .unwrap();

        let prompts = oracle.prompts();
        assert_eq!(prompts[0], prompts[1]);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let oracle = ScriptedOracle::new(vec![Ok("nope".to_string()), Ok(VALID.to_string())]);
        let err = VerdictGenerator::new(oracle.clone())
            .with_max_retries(0)
            .generate(bundle())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VerdictGenerationError::Exhausted { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::Transport("connection reset".to_string())),
            Ok(VALID.to_string()),
        ]);
        let err = VerdictGenerator::new(oracle.clone())
            .generate(bundle())
            .await
            .unwrap_err();

        assert!(matches!(err, VerdictGenerationError::Oracle(_)));
        assert_eq!(oracle.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_response_is_not_retried() {
        let oracle = ScriptedOracle::new(vec![
            Err(OracleError::EmptyResponse),
            Ok(VALID.to_string()),
        ]);
        let err = VerdictGenerator::new(oracle.clone())
            .generate(bundle())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VerdictGenerationError::Oracle(OracleError::EmptyResponse)
        ));
        assert_eq!(oracle.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_checks_performed_ignores_oracle_claims() {
        let claimed = r#"{"eligible": "yes", "confidence": 90, "rationale": "all checks", "checks_performed": ["review_search", "wayback_archive"]}"#;
        let oracle = ScriptedOracle::new(vec![Ok(claimed.to_string())]);
        let result = VerdictGenerator::new(oracle)
            .generate(bundle())
            .await
            .unwrap();

        let checks: Vec<&str> = result.checks_performed().iter().map(String::as_str).collect();
        assert_eq!(checks, ["business_website", "platform_search"]);
    }

    #[tokio::test]
    async fn test_result_serialization_hides_raw_findings() {
        let oracle = ScriptedOracle::new(vec![Ok(VALID.to_string())]);
        let result = VerdictGenerator::new(oracle)
            .generate(bundle())
            .await
            .unwrap();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["eligible"], "yes");
        assert_eq!(value["confidence"], 82);
        assert!(value.get("raw_findings").is_none());
        assert_eq!(result.raw_findings().findings().len(), 3);
    }
}
