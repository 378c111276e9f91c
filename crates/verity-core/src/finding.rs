//! Tagged per-source outcomes.
//!
//! A [`Finding`] is the only thing a signal task ever produces. Success and
//! failure are both represented as data so that everything downstream of the
//! fan-out is plain sequence processing.
//!
//! # Invariants
//!
//! - `payload` is present iff `status == Ok`.
//! - `error_message` is present iff `status != Ok`.
//!
//! Both are enforced by keeping the fields private; the only way to build a
//! finding is through [`Finding::ok`], [`Finding::failed`] and
//! [`Finding::timed_out`].

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Outcome tag of a single signal task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// The lookup completed and produced a payload.
    Ok,
    /// The lookup raised a fault (or panicked).
    Failed,
    /// The lookup did not finish before its deadline.
    TimedOut,
}

impl FindingStatus {
    /// Returns the wire label for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of one signal task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    source: String,
    status: FindingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    elapsed_ms: u64,
}

impl Finding {
    /// Successful lookup carrying a source-specific payload.
    #[must_use]
    pub fn ok(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            status: FindingStatus::Ok,
            payload: Some(payload),
            error_message: None,
            elapsed_ms: 0,
        }
    }

    /// Lookup that raised a fault.
    #[must_use]
    pub fn failed(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: FindingStatus::Failed,
            payload: None,
            error_message: Some(message.into()),
            elapsed_ms: 0,
        }
    }

    /// Lookup abandoned after `timeout` elapsed.
    #[must_use]
    pub fn timed_out(source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: source.into(),
            status: FindingStatus::TimedOut,
            payload: None,
            error_message: Some(format!("no response within {}ms", timeout.as_millis())),
            elapsed_ms: 0,
        }
    }

    /// Records how long the lookup took.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replaces the payload of a successful finding, keeping its timing.
    ///
    /// Non-ok findings are returned unchanged.
    #[must_use]
    pub fn map_payload(self, f: impl FnOnce(Value) -> Value) -> Self {
        match self.payload {
            Some(payload) if self.status == FindingStatus::Ok => Self {
                payload: Some(f(payload)),
                ..self
            },
            _ => self,
        }
    }

    /// Name of the originating task.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Outcome tag.
    #[must_use]
    pub const fn status(&self) -> FindingStatus {
        self.status
    }

    /// Returns `true` if the lookup succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == FindingStatus::Ok
    }

    /// Payload of a successful lookup.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Failure description of an unsuccessful lookup.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Wall-clock time the lookup took, in milliseconds.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}
