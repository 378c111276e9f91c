//! Signal source contracts.
//!
//! Connectors live outside the core. The core only sees them through
//! [`SignalSource`] (and [`ArchiveQuery`] for the archive-continuity check)
//! and turns each into a [`SignalTask`] at dispatch time.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::BoxFuture;
use crate::archive::ArchiveCapture;
use crate::request::VerificationRequest;

/// Result of one connector invocation.
pub type SourceOutput = Result<Value, SourceError>;

/// Fault raised by a signal source.
///
/// Never crosses the fan-out boundary: [`crate::run_timed`] converts it into
/// a `failed` [`crate::Finding`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SourceError {
    /// Transport-level failure (connect, TLS, status code).
    #[error("request failed: {0}")]
    Http(String),

    /// The upstream answered but the body could not be interpreted.
    #[error("unreadable response: {0}")]
    Parse(String),

    /// The upstream is unavailable after retries.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request lacked what this source needs.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// An independent lookup contributing one finding per verification.
pub trait SignalSource: Send + Sync {
    /// Unique name among sibling sources (e.g. `review_search`).
    fn name(&self) -> &str;

    /// Builds the lookup for `request`.
    ///
    /// The returned future owns everything it needs; it is awaited under the
    /// fan-out deadline and dropped if the deadline passes.
    fn fetch(&self, request: &VerificationRequest) -> BoxFuture<'static, SourceOutput>;
}

/// Archive query interface consumed by the archive-continuity check.
pub trait ArchiveQuery: Send + Sync {
    /// Returns the chronologically ordered captures known for `domain`.
    fn captures(&self, domain: &str)
    -> BoxFuture<'static, Result<Vec<ArchiveCapture>, SourceError>>;
}

/// A named, independent unit of lookup work with its own deadline.
pub struct SignalTask {
    name: String,
    timeout: Duration,
    operation: BoxFuture<'static, SourceOutput>,
}

impl SignalTask {
    /// Wraps `operation` as a task named `name`.
    pub fn new<F>(name: impl Into<String>, timeout: Duration, operation: F) -> Self
    where
        F: Future<Output = SourceOutput> + Send + 'static,
    {
        Self {
            name: name.into(),
            timeout,
            operation: Box::pin(operation),
        }
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-task deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn into_parts(self) -> (String, Duration, BoxFuture<'static, SourceOutput>) {
        (self.name, self.timeout, self.operation)
    }
}

impl std::fmt::Debug for SignalTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalTask")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
