//! Verifier configuration.

use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

/// Default number of signal tasks allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default deadline for an ordinary signal source.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for the archive-continuity source.
///
/// The archive check fetches several snapshot bodies sequentially.
pub const DEFAULT_ARCHIVE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default number of additional oracle attempts after a schema violation.
pub const DEFAULT_VERDICT_RETRIES: u32 = 2;

/// Default minimum identity score for a capture to match the claim.
pub const DEFAULT_IDENTITY_MATCH_THRESHOLD: f64 = 0.65;

/// Default continuity gap above which an ownership change is material.
pub const DEFAULT_MATERIAL_GAP_DAYS: i64 = 180;

/// Invalid configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Concurrency ceiling must admit at least one task.
    #[error("concurrency must be >= 1")]
    ZeroConcurrency,

    /// A deadline of zero would time out every task.
    #[error("{field} must be greater than zero")]
    ZeroTimeout {
        /// Offending setting.
        field: &'static str,
    },

    /// Identity threshold outside `(0, 1]`.
    #[error("identity match threshold must be in (0, 1], got {0}")]
    ThresholdOutOfRange(String),

    /// Negative material-gap threshold.
    #[error("material gap must not be negative")]
    NegativeMaterialGap,
}

/// Configuration for a [`crate::Verifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierConfig {
    /// Maximum signal tasks in flight.
    pub concurrency: usize,
    /// Deadline for each ordinary source.
    pub source_timeout: Duration,
    /// Deadline for the archive source.
    pub archive_timeout: Duration,
    /// Delay a slot is held after its task finishes.
    pub pacing: Duration,
    /// Additional oracle attempts after a schema violation.
    pub verdict_retries: u32,
    /// Append the last violation to the retry prompt.
    pub retry_feedback: bool,
    /// Minimum identity score for a capture to match.
    pub identity_match_threshold: f64,
    /// Gap above which a continuity gap is labeled material.
    pub material_gap: TimeDelta,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            archive_timeout: DEFAULT_ARCHIVE_TIMEOUT,
            pacing: Duration::ZERO,
            verdict_retries: DEFAULT_VERDICT_RETRIES,
            retry_feedback: true,
            identity_match_threshold: DEFAULT_IDENTITY_MATCH_THRESHOLD,
            material_gap: TimeDelta::days(DEFAULT_MATERIAL_GAP_DAYS),
        }
    }
}

impl VerifierConfig {
    /// Set the concurrency ceiling.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the ordinary source deadline.
    #[must_use]
    pub const fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Set the archive source deadline.
    #[must_use]
    pub const fn with_archive_timeout(mut self, timeout: Duration) -> Self {
        self.archive_timeout = timeout;
        self
    }

    /// Set the per-slot pacing delay.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the verdict retry bound.
    #[must_use]
    pub const fn with_verdict_retries(mut self, retries: u32) -> Self {
        self.verdict_retries = retries;
        self
    }

    /// Enable or disable violation feedback on retry.
    #[must_use]
    pub const fn with_retry_feedback(mut self, enabled: bool) -> Self {
        self.retry_feedback = enabled;
        self
    }

    /// Set the identity match threshold.
    #[must_use]
    pub const fn with_identity_match_threshold(mut self, threshold: f64) -> Self {
        self.identity_match_threshold = threshold;
        self
    }

    /// Set the material continuity-gap threshold.
    #[must_use]
    pub const fn with_material_gap(mut self, gap: TimeDelta) -> Self {
        self.material_gap = gap;
        self
    }

    /// Checks that the configuration can drive a verification.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.source_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "source_timeout",
            });
        }
        if self.archive_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout {
                field: "archive_timeout",
            });
        }
        if !(self.identity_match_threshold > 0.0 && self.identity_match_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(
                self.identity_match_threshold.to_string(),
            ));
        }
        if self.material_gap < TimeDelta::zero() {
            return Err(ConfigError::NegativeMaterialGap);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(VerifierConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = VerifierConfig::default()
            .with_concurrency(2)
            .with_source_timeout(Duration::from_secs(5))
            .with_verdict_retries(0)
            .with_retry_feedback(false)
            .with_material_gap(TimeDelta::days(30));

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.source_timeout, Duration::from_secs(5));
        assert_eq!(config.verdict_retries, 0);
        assert!(!config.retry_feedback);
        assert_eq!(config.material_gap, TimeDelta::days(30));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(
            VerifierConfig::default().with_concurrency(0).validate(),
            Err(ConfigError::ZeroConcurrency)
        );
        assert_eq!(
            VerifierConfig::default()
                .with_archive_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::ZeroTimeout {
                field: "archive_timeout"
            })
        );
        assert!(matches!(
            VerifierConfig::default()
                .with_identity_match_threshold(1.5)
                .validate(),
            Err(ConfigError::ThresholdOutOfRange(_))
        ));
        assert!(matches!(
            VerifierConfig::default()
                .with_identity_match_threshold(f64::NAN)
                .validate(),
            Err(ConfigError::ThresholdOutOfRange(_))
        ));
        assert_eq!(
            VerifierConfig::default()
                .with_material_gap(TimeDelta::days(-1))
                .validate(),
            Err(ConfigError::NegativeMaterialGap)
        );
    }
}
