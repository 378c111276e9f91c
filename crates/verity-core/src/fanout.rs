//! Timed task runner and bounded fan-out executor.
//!
//! # Architecture
//!
//! ```text
//! FanOutExecutor::run(tasks)
//!     |-- for each task, in input order:
//!     |       acquire an owned permit from the admission gate (waits while
//!     |       `limit` tasks are in flight)
//!     |       spawn: run_timed(task) -> Finding, hold slot for `pacing`,
//!     |              release permit
//!     `-- await join handles in input order -> Vec<Finding>
//! ```
//!
//! The admission gate is the only synchronization point. Each spawned task
//! owns its request lifecycle and produces an immutable [`Finding`]; the
//! caller is the single writer of the result vector.
//!
//! # Invariants
//!
//! - [INV-FAN-001] Exactly one finding per input task, in input order.
//! - [INV-FAN-002] At most `limit` tasks are in flight at any instant.
//! - [INV-FAN-003] No fault, panic or timeout escapes [`run_timed`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::config::ConfigError;
use crate::finding::Finding;
use crate::source::{SignalTask, SourceOutput};

/// Runs one lookup under `timeout`, converting every outcome into a finding.
///
/// - completes in time with a payload: `ok`
/// - returns a [`crate::SourceError`] or panics: `failed`
/// - deadline elapses first: `timed_out`; the operation is dropped, which
///   cancels it at its next suspension point
pub async fn run_timed(
    name: &str,
    timeout: Duration,
    operation: BoxFuture<'static, SourceOutput>,
) -> Finding {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(operation).catch_unwind()).await;

    let finding = match outcome {
        Ok(Ok(Ok(payload))) => Finding::ok(name, payload),
        Ok(Ok(Err(err))) => {
            warn!(source = %name, error = %err, "signal source failed");
            Finding::failed(name, err.to_string())
        },
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            warn!(source = %name, panic = %message, "signal source panicked");
            Finding::failed(name, format!("source panicked: {message}"))
        },
        Err(_) => {
            warn!(
                source = %name,
                timeout_ms = timeout.as_millis(),
                "signal source timed out"
            );
            Finding::timed_out(name, timeout)
        },
    };

    let finding = finding.with_elapsed(started.elapsed());
    debug!(
        source = %name,
        status = %finding.status(),
        elapsed_ms = finding.elapsed_ms(),
        "signal task finished"
    );
    finding
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Bounded fan-out executor for signal tasks.
#[derive(Debug, Clone)]
pub struct FanOutExecutor {
    limit: usize,
    pacing: Duration,
}

impl FanOutExecutor {
    /// Creates an executor admitting at most `limit` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroConcurrency`] if `limit` is zero.
    pub const fn new(limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(Self {
            limit,
            pacing: Duration::ZERO,
        })
    }

    /// Hold each slot for `pacing` after its task finishes.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Concurrency ceiling.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Runs every task and returns their findings in input order.
    ///
    /// Returns only once every task has an outcome.
    pub async fn run(&self, tasks: Vec<SignalTask>) -> Vec<Finding> {
        let names: Vec<String> = tasks.iter().map(|task| task.name().to_string()).collect();
        debug!(
            tasks = names.len(),
            limit = self.limit,
            "dispatching signal tasks"
        );

        let jobs = tasks.into_iter().map(|task| {
            let (name, timeout, operation) = task.into_parts();
            async move { run_timed(&name, timeout, operation).await }
        });

        run_admitted(jobs, self.limit, self.pacing)
            .await
            .into_iter()
            .zip(names)
            .map(|(outcome, name)| {
                outcome.unwrap_or_else(|err| {
                    warn!(source = %name, error = %err, "signal task aborted");
                    Finding::failed(name, format!("task aborted: {err}"))
                })
            })
            .collect()
    }
}

/// Runs `jobs` on spawned tasks with at most `limit` in flight.
///
/// A permit is acquired before each spawn, so no more than `limit` units
/// exist at once. Outcomes are returned in input order.
pub(crate) async fn run_admitted<I, F, T>(
    jobs: I,
    limit: usize,
    pacing: Duration,
) -> Vec<Result<T, JoinError>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let gate = Arc::new(Semaphore::new(limit.max(1)));
    let mut handles = Vec::new();

    for job in jobs {
        // The gate is local and never closed, so acquisition only waits.
        let permit = Arc::clone(&gate).acquire_owned().await.ok();
        handles.push(tokio::spawn(async move {
            let output = job.await;
            if !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            drop(permit);
            output
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::finding::FindingStatus;
    use crate::source::SourceError;

    /// Tracks how many tasks are running and the peak seen.
    #[derive(Default)]
    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    struct InFlightGuard(Arc<InFlight>);

    impl InFlight {
        fn enter(self: &Arc<Self>) -> InFlightGuard {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            InFlightGuard(Arc::clone(self))
        }
    }

    impl Drop for InFlightGuard {
        fn drop(&mut self) {
            self.0.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn sleeping_task(name: &str, delay_ms: u64, tracker: &Arc<InFlight>) -> SignalTask {
        let tracker = Arc::clone(tracker);
        let label = name.to_string();
        SignalTask::new(name, Duration::from_secs(30), async move {
            let _guard = tracker.enter();
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!({ "from": label }))
        })
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(
            FanOutExecutor::new(0).unwrap_err(),
            ConfigError::ZeroConcurrency
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timed_ok() {
        let finding = run_timed(
            "business_website",
            Duration::from_secs(1),
            Box::pin(async { Ok(json!({"summary": "hello"})) }),
        )
        .await;
        assert!(finding.is_ok());
        assert_eq!(finding.source(), "business_website");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timed_converts_error() {
        let finding = run_timed(
            "review_search",
            Duration::from_secs(1),
            Box::pin(async { Err(SourceError::Http("HTTP 503".to_string())) }),
        )
        .await;
        assert_eq!(finding.status(), FindingStatus::Failed);
        assert_eq!(finding.error_message(), Some("request failed: HTTP 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timed_converts_timeout() {
        let finding = run_timed(
            "wayback_archive",
            Duration::from_millis(100),
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!(null))
            }),
        )
        .await;
        assert_eq!(finding.status(), FindingStatus::TimedOut);
        assert_eq!(finding.payload(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timed_converts_panic() {
        let finding = run_timed(
            "general_search",
            Duration::from_secs(1),
            Box::pin(async {
                if true {
                    panic!("connector bug");
                }
                Ok(json!(null))
            }),
        )
        .await;
        assert_eq!(finding.status(), FindingStatus::Failed);
        assert_eq!(
            finding.error_message(),
            Some("source panicked: connector bug")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_findings_follow_input_order_not_completion_order() {
        let tracker = Arc::new(InFlight::default());
        let tasks = vec![
            sleeping_task("a", 500, &tracker),
            sleeping_task("b", 400, &tracker),
            sleeping_task("c", 300, &tracker),
            sleeping_task("d", 200, &tracker),
            sleeping_task("e", 100, &tracker),
        ];

        let findings = FanOutExecutor::new(3).unwrap().run(tasks).await;

        let sources: Vec<&str> = findings.iter().map(Finding::source).collect();
        assert_eq!(sources, ["a", "b", "c", "d", "e"]);
        assert!(findings.iter().all(Finding::is_ok));
        assert_eq!(findings[4].payload(), Some(&json!({"from": "e"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_bound_respected() {
        let tracker = Arc::new(InFlight::default());
        let tasks = (0..5)
            .map(|i| sleeping_task(&format!("t{i}"), 100 + i * 10, &tracker))
            .collect();

        let findings = FanOutExecutor::new(2).unwrap().run(tasks).await;

        assert_eq!(findings.len(), 5);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_one_is_sequential() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tasks = ["first", "second", "third"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let log = Arc::clone(&log);
                let delay = 300 - u64::try_from(i).unwrap() * 100;
                SignalTask::new(name, Duration::from_secs(5), async move {
                    log.lock().unwrap().push(format!("start {name}"));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(format!("end {name}"));
                    Ok(json!(name))
                })
            })
            .collect();

        FanOutExecutor::new(1).unwrap().run(tasks).await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "start first",
                "end first",
                "start second",
                "end second",
                "start third",
                "end third"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_above_task_count_runs_everything_at_once() {
        let tracker = Arc::new(InFlight::default());
        let tasks = (0..4)
            .map(|i| sleeping_task(&format!("t{i}"), 1_000, &tracker))
            .collect();

        let started = tokio::time::Instant::now();
        FanOutExecutor::new(16).unwrap().run(tasks).await;

        assert_eq!(tracker.peak.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_bounded_by_its_own_timeout() {
        let tracker = Arc::new(InFlight::default());
        let mut tasks = vec![SignalTask::new(
            "reviews",
            Duration::from_secs(1),
            async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(json!(null))
            },
        )];
        tasks.extend((0..4).map(|i| sleeping_task(&format!("fast{i}"), 50, &tracker)));

        let started = tokio::time::Instant::now();
        let findings = FanOutExecutor::new(5).unwrap().run(tasks).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(findings[0].status(), FindingStatus::TimedOut);
        assert!(findings[1..].iter().all(Finding::is_ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_cancel_siblings() {
        let tracker = Arc::new(InFlight::default());
        let tasks = vec![
            sleeping_task("web", 100, &tracker),
            SignalTask::new("reviews", Duration::from_secs(1), async {
                Err(SourceError::Unavailable("search exhausted retries".to_string()))
            }),
            sleeping_task("context", 200, &tracker),
        ];

        let findings = FanOutExecutor::new(2).unwrap().run(tasks).await;

        let statuses: Vec<FindingStatus> = findings.iter().map(Finding::status).collect();
        assert_eq!(
            statuses,
            [FindingStatus::Ok, FindingStatus::Failed, FindingStatus::Ok]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_holds_slot() {
        let tracker = Arc::new(InFlight::default());
        let tasks = (0..3)
            .map(|i| sleeping_task(&format!("t{i}"), 10, &tracker))
            .collect();

        let started = tokio::time::Instant::now();
        FanOutExecutor::new(1)
            .unwrap()
            .with_pacing(Duration::from_millis(500))
            .run(tasks)
            .await;

        assert!(started.elapsed() >= Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let findings = FanOutExecutor::new(2).unwrap().run(Vec::new()).await;
        assert!(findings.is_empty());
    }
}
