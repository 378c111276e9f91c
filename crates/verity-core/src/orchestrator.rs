//! End-to-end verification state machine.
//!
//! # State Machine
//!
//! ```text
//! Dispatching ──> Reconciling ──> Consolidating ──> GeneratingVerdict ──> Done
//!      │                              ▲                    │
//!      └──── archive lookup failed ───┘                    └──> Failed
//! ```
//!
//! Transitions only move forward. Any stage may fall to `Failed` on an
//! orchestration fault (for example two sources sharing a name), but a
//! source failure never does: it is already a `failed` / `timed_out`
//! [`Finding`] by the time this module sees it.
//!
//! # Invariants
//!
//! - [INV-ORC-001] `Done` carries a complete [`VerificationResult`];
//!   `Failed` carries a [`VerifyError`] and nothing else.
//! - [INV-ORC-002] Reconciliation runs only over an `ok` archive finding
//!   produced by the registered [`ArchiveQuery`].
//! - [INV-ORC-003] Source names are unique within one dispatch.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::{
    ArchiveSnapshot, Continuity, IdentityClaim, ReconcileError, ReconcilePolicy,
    domain_from_website, no_captures_payload, reconcile,
};
use crate::config::VerifierConfig;
use crate::error::VerifyError;
use crate::evidence::consolidate;
use crate::fanout::{FanOutExecutor, run_admitted};
use crate::finding::Finding;
use crate::request::VerificationRequest;
use crate::source::{ArchiveQuery, SignalSource, SignalTask, SourceError, SourceOutput};
use crate::verdict::{Oracle, VerdictGenerator, VerificationResult};

/// Source name of the archive-continuity lookup.
pub const ARCHIVE_SOURCE: &str = "wayback_archive";

// =============================================================================
// Stages
// =============================================================================

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Running every signal task.
    Dispatching,
    /// Turning archive captures into an identity window.
    Reconciling,
    /// Building the evidence bundle.
    Consolidating,
    /// Driving the oracle to a valid verdict.
    GeneratingVerdict,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Failed,
}

impl Stage {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dispatching => "dispatching",
            Self::Reconciling => "reconciling",
            Self::Consolidating => "consolidating",
            Self::GeneratingVerdict => "generating_verdict",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Done` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Done | Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (Self::Dispatching, Self::Reconciling | Self::Consolidating)
            | (Self::Reconciling, Self::Consolidating)
            | (Self::Consolidating, Self::GeneratingVerdict)
            | (Self::GeneratingVerdict, Self::Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct StageLog {
    stages: Vec<Stage>,
}

impl StageLog {
    fn start() -> Self {
        debug!(stage = %Stage::Dispatching, "verification stage");
        Self {
            stages: vec![Stage::Dispatching],
        }
    }

    fn current(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Dispatching)
    }

    fn advance(&mut self, next: Stage) -> Result<(), VerifyError> {
        let current = self.current();
        if !current.can_advance_to(next) {
            return Err(VerifyError::Orchestrator(format!(
                "illegal stage transition {current} -> {next}"
            )));
        }
        debug!(from = %current, to = %next, "verification stage");
        self.stages.push(next);
        Ok(())
    }

    fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.stages.push(Stage::Failed);
        }
    }
}

/// Outcome of one verification plus the stages it passed through.
#[derive(Debug)]
pub struct Traced {
    stages: Vec<Stage>,
    outcome: Result<VerificationResult, VerifyError>,
}

impl Traced {
    /// Stages visited, in order; the last one is terminal.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Terminal stage.
    #[must_use]
    pub fn terminal(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Failed)
    }

    /// Result or typed failure.
    #[must_use]
    pub const fn outcome(&self) -> &Result<VerificationResult, VerifyError> {
        &self.outcome
    }

    /// Consumes the trace, keeping the outcome.
    pub fn into_outcome(self) -> Result<VerificationResult, VerifyError> {
        self.outcome
    }
}

// =============================================================================
// Verifier
// =============================================================================

enum Lookup {
    Signal(Arc<dyn SignalSource>),
    Archive(Arc<dyn ArchiveQuery>),
}

impl Lookup {
    fn name(&self) -> &str {
        match self {
            Self::Signal(source) => source.name(),
            Self::Archive(_) => ARCHIVE_SOURCE,
        }
    }
}

/// Composes fan-out, reconciliation, consolidation and verdict generation.
///
/// Lookups are dispatched in registration order, which is also the order
/// findings appear in the prompt.
pub struct Verifier {
    config: VerifierConfig,
    executor: FanOutExecutor,
    generator: VerdictGenerator,
    lookups: Vec<Lookup>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.lookups.iter().map(Lookup::name).collect();
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("lookups", &names)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Creates a verifier with no lookups registered.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: VerifierConfig, oracle: Arc<dyn Oracle>) -> Result<Self, VerifyError> {
        config.validate()?;
        let executor = FanOutExecutor::new(config.concurrency)?;
        let generator = VerdictGenerator::new(oracle)
            .with_max_retries(config.verdict_retries)
            .with_feedback(config.retry_feedback);
        Ok(Self {
            config,
            executor,
            generator,
            lookups: Vec::new(),
        })
    }

    /// Registers a signal source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.lookups.push(Lookup::Signal(source));
        self
    }

    /// Registers the archive-continuity lookup under [`ARCHIVE_SOURCE`].
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveQuery>) -> Self {
        self.lookups.push(Lookup::Archive(archive));
        self
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verifies one candidate.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::VerdictGeneration`] when the oracle could not be made
    ///   to answer validly
    /// - [`VerifyError::Orchestrator`] on an unexpected orchestration fault
    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResult, VerifyError> {
        self.verify_traced(request).await.into_outcome()
    }

    /// Verifies one candidate and reports the stages visited.
    pub async fn verify_traced(&self, request: &VerificationRequest) -> Traced {
        let mut log = StageLog::start();
        let outcome = self.run(request, &mut log).await;
        match &outcome {
            Ok(result) => info!(
                business = %request.subject.name,
                eligible = result.eligible().as_str(),
                confidence = result.confidence().value(),
                checks = result.checks_performed().len(),
                "verification complete"
            ),
            Err(err) => {
                log.fail();
                error!(business = %request.subject.name, error = %err, "verification failed");
            },
        }
        Traced {
            stages: log.stages,
            outcome,
        }
    }

    /// Verifies many candidates with at most `concurrency` in flight.
    ///
    /// Returns one outcome per request, in input order. A `concurrency` of
    /// zero is treated as one. Each slot is held for the configured pacing
    /// delay after its verification finishes.
    pub async fn verify_batch(
        self: &Arc<Self>,
        requests: Vec<VerificationRequest>,
        concurrency: usize,
    ) -> Vec<Result<VerificationResult, VerifyError>> {
        info!(
            candidates = requests.len(),
            concurrency, "starting batch verification"
        );
        let jobs = requests.into_iter().map(|request| {
            let verifier = Arc::clone(self);
            async move { verifier.verify(&request).await }
        });

        run_admitted(jobs, concurrency, self.config.pacing)
            .await
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|err| {
                    Err(VerifyError::Orchestrator(format!(
                        "verification task aborted: {err}"
                    )))
                })
            })
            .collect()
    }

    async fn run(
        &self,
        request: &VerificationRequest,
        log: &mut StageLog,
    ) -> Result<VerificationResult, VerifyError> {
        let tasks = self.dispatch(request)?;
        let findings = self.executor.run(tasks).await;

        let archive_ok = findings
            .iter()
            .any(|finding| finding.source() == ARCHIVE_SOURCE && finding.is_ok());
        let findings = if archive_ok && self.has_archive() {
            log.advance(Stage::Reconciling)?;
            self.reconcile_findings(request, findings)?
        } else {
            findings
        };

        log.advance(Stage::Consolidating)?;
        let bundle = Arc::new(consolidate(request.clone(), findings));

        log.advance(Stage::GeneratingVerdict)?;
        let result = self.generator.generate(bundle).await?;

        log.advance(Stage::Done)?;
        Ok(result)
    }

    fn has_archive(&self) -> bool {
        self.lookups
            .iter()
            .any(|lookup| matches!(lookup, Lookup::Archive(_)))
    }

    fn dispatch(&self, request: &VerificationRequest) -> Result<Vec<SignalTask>, VerifyError> {
        let mut names = HashSet::new();
        for lookup in &self.lookups {
            if !names.insert(lookup.name()) {
                return Err(VerifyError::Orchestrator(format!(
                    "duplicate source name: {}",
                    lookup.name()
                )));
            }
        }

        Ok(self
            .lookups
            .iter()
            .map(|lookup| match lookup {
                Lookup::Signal(source) => SignalTask::new(
                    source.name(),
                    self.config.source_timeout,
                    source.fetch(request),
                ),
                Lookup::Archive(archive) => SignalTask::new(
                    ARCHIVE_SOURCE,
                    self.config.archive_timeout,
                    archive_lookup(
                        Arc::clone(archive),
                        request.subject.website().map(str::to_string),
                    ),
                ),
            })
            .collect())
    }

    fn reconcile_findings(
        &self,
        request: &VerificationRequest,
        findings: Vec<Finding>,
    ) -> Result<Vec<Finding>, VerifyError> {
        let claim = IdentityClaim::new(&request.subject.name, &request.subject.city);
        let policy = ReconcilePolicy {
            match_threshold: self.config.identity_match_threshold,
            material_gap: self.config.material_gap,
        };

        findings
            .into_iter()
            .map(|finding| {
                if finding.source() == ARCHIVE_SOURCE && finding.is_ok() {
                    reconcile_finding(finding, &claim, &policy)
                } else {
                    Ok(finding)
                }
            })
            .collect()
    }
}

fn archive_lookup(
    archive: Arc<dyn ArchiveQuery>,
    website: Option<String>,
) -> impl Future<Output = SourceOutput> + Send + 'static {
    async move {
        let website =
            website.ok_or_else(|| SourceError::InvalidInput("no website on file".to_string()))?;
        let domain = domain_from_website(&website).ok_or_else(|| {
            SourceError::InvalidInput(format!("cannot derive a domain from {website}"))
        })?;
        let captures = archive.captures(&domain).await?;
        debug!(domain = %domain, captures = captures.len(), "archive captures fetched");
        serde_json::to_value(ArchiveSnapshot { domain, captures })
            .map_err(|err| SourceError::Parse(err.to_string()))
    }
}

fn reconcile_finding(
    finding: Finding,
    claim: &IdentityClaim,
    policy: &ReconcilePolicy,
) -> Result<Finding, VerifyError> {
    let Some(payload) = finding.payload() else {
        return Ok(finding);
    };
    let snapshot: ArchiveSnapshot = serde_json::from_value(payload.clone()).map_err(|err| {
        VerifyError::Orchestrator(format!("archive finding is not a capture list: {err}"))
    })?;

    let replacement = match reconcile(&snapshot.captures, claim, policy) {
        Ok(window) => {
            match window.continuity {
                Continuity::Gap { material } => warn!(
                    domain = %snapshot.domain,
                    gap_days = window.continuity_gap.map_or(0, |gap| gap.num_days()),
                    material,
                    "continuity gap between domain and business identity"
                ),
                Continuity::Indeterminate => warn!(
                    domain = %snapshot.domain,
                    captures = window.captures_examined,
                    "identity continuity indeterminate"
                ),
                Continuity::Coincident => debug!(domain = %snapshot.domain, "identity coincident"),
            }
            window.to_payload(&snapshot.domain)
        },
        Err(ReconcileError::NoCaptures) => no_captures_payload(&snapshot.domain),
    };
    Ok(finding.map_payload(|_| replacement))
}
