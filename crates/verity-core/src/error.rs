//! Orchestrator-level errors.
//!
//! Only two things ever reach a caller as an error: a verdict that could not
//! be obtained within the retry bound, and an unexpected orchestration fault.
//! Source failures and indeterminate identity are recovered as data.

use thiserror::Error;

use crate::config::ConfigError;
use crate::verdict::VerdictGenerationError;

/// Terminal failure of a verification call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// The oracle could not be made to answer validly.
    #[error(transparent)]
    VerdictGeneration(#[from] VerdictGenerationError),

    /// Unexpected fault outside the recoverable categories.
    #[error("orchestration failed: {0}")]
    Orchestrator(String),

    /// The verifier was built with an unusable configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
