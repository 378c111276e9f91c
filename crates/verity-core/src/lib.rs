//! verity-core - verification orchestration core.
//!
//! Verifies a claim about a business against a settlement record by running
//! several independent, failure-prone lookups, reconciling their findings and
//! asking an external reasoning oracle for a typed eligibility verdict.
//!
//! # Architecture
//!
//! ```text
//! Verifier::verify(request)
//!     |-- Dispatching        FanOutExecutor runs every SignalTask under a
//!     |                      counting admission gate; run_timed turns each
//!     |                      outcome into exactly one Finding
//!     |-- Reconciling        archive captures -> IdentityWindow (skipped when
//!     |                      the archive lookup itself failed)
//!     |-- Consolidating      ordered, deduplicated EvidenceBundle
//!     |-- GeneratingVerdict  oracle call + strict schema parse, bounded retry
//!     `-- Done | Failed
//! ```
//!
//! # Module Overview
//!
//! - [`fanout`]: timed task runner and bounded fan-out executor
//! - [`finding`]: tagged per-source outcome ([`Finding`], [`FindingStatus`])
//! - [`archive`]: archive captures and the temporal identity reconciler
//! - [`evidence`]: findings consolidation ([`EvidenceBundle`])
//! - [`verdict`]: oracle contract, schema validation and the retry loop
//! - [`orchestrator`]: the end-to-end [`Verifier`] state machine
//!
//! # Failure Model
//!
//! Source-level failures are data: a lookup that errors, panics or misses its
//! deadline becomes a `failed` / `timed_out` [`Finding`] and the verification
//! continues. Only verdict generation (after the retry bound) and unexpected
//! orchestration faults surface as [`VerifyError`].

use std::future::Future;
use std::pin::Pin;

pub mod archive;
pub mod config;
pub mod error;
pub mod evidence;
pub mod fanout;
pub mod finding;
pub mod orchestrator;
pub mod prompt;
pub mod request;
pub mod source;
pub mod verdict;

pub use archive::{
    ArchiveCapture, ArchiveSnapshot, ContentSignature, Continuity, IdentityClaim, IdentityWindow,
    ReconcilePolicy, UrlState, reconcile,
};
pub use config::{ConfigError, VerifierConfig};
pub use error::VerifyError;
pub use evidence::{EvidenceBundle, consolidate};
pub use fanout::{FanOutExecutor, run_timed};
pub use finding::{Finding, FindingStatus};
pub use orchestrator::{Stage, Traced, Verifier};
pub use request::{SettlementRef, Subject, VerificationRequest};
pub use source::{ArchiveQuery, SignalSource, SignalTask, SourceError, SourceOutput};
pub use verdict::{
    Confidence, Eligibility, Oracle, OracleError, OracleVerdict, SchemaViolation,
    VerdictGenerationError, VerdictGenerator, VerificationResult, parse_verdict,
};

/// Boxed future returned by collaborator trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
