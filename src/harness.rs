//! Test execution: provision, run, tear down.
//!
//! The [`Harness`] drives every registered descriptor through the
//! selector and, for each eligible one, through [`Harness::execute_one`]:
//!
//! ```text
//! new_cluster ──► new_machine × cluster_size ──► body ──► destroy
//!      │                    │                      │          ▲
//!      └── Fail, no         └── Fail ──────────────┴──────────┘
//!          teardown                              (always)
//! ```
//!
//! Cluster creation, machine provisioning and the body share one
//! deadline. Whatever happens inside that window (fatal assertion,
//! platform error, panic, timeout, cancellation), the outcome is folded
//! into a single [`TestResult`] and the cluster is destroyed under its
//! own teardown timeout before `execute_one` returns.
//!
//! Tests run concurrently up to the configured parallelism. Results are
//! returned in registration order regardless of completion order.
//!
//! # Example
//!
//! ```no_run
//! use sortie::harness::{Harness, HarnessOptions};
//! use sortie::platform::local::LocalFlight;
//! use sortie::register::Registry;
//! use sortie::report::NullReporter;
//! use sortie::selector::Target;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut registry = Registry::new();
//! sortie::suite::register_all(&mut registry)?;
//! registry.close();
//!
//! let flight = LocalFlight::new(&Default::default())?;
//! let harness = Harness::new(flight, NullReporter, HarnessOptions::default());
//! let target = Target::new("local", "rhcos", "x86_64");
//! let result = harness.run(&registry, &target).await?;
//! std::process::exit(result.exit_code());
//! # }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt, TryFutureExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cluster::{TestCluster, TestFailure};
use crate::config::HarnessConfig;
use crate::platform::{Cluster, Flight, MachineConfig};
use crate::register::{Descriptor, Registry};
use crate::report::Reporter;
use crate::selector::{Listing, SelectError, Selection, SkipReason, Target, select};

/// Final status of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
        }
    }
}

/// Outcome of one registered test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Descriptor name.
    pub name: String,

    pub status: TestStatus,

    /// Failure diagnostic or skip reason. `None` for passing tests.
    pub message: Option<String>,

    /// Wall-clock time from cluster request to end of teardown.
    pub duration: Duration,
}

impl TestResult {
    fn pass(name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Pass,
            message: None,
            duration,
        }
    }

    fn fail(name: &str, failure: &TestFailure, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Fail,
            message: Some(failure.to_string()),
            duration,
        }
    }

    fn skip(name: &str, reason: SkipReason) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Skip,
            message: Some(reason.to_string()),
            duration: Duration::ZERO,
        }
    }
}

/// Aggregated results of a whole run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every test passed or was skipped |
/// | 1 | At least one test failed |
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Number of registered tests.
    pub total_tests: usize,

    pub passed: usize,

    pub failed: usize,

    pub skipped: usize,

    /// Wall-clock duration of the run.
    pub duration: Duration,

    /// One result per registered test, in registration order.
    pub results: Vec<TestResult>,
}

impl RunResult {
    fn from_results(results: Vec<TestResult>, duration: Duration) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            total_tests: results.len(),
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            duration,
            results,
        }
    }

    /// Returns `true` if no test failed.
    ///
    /// # Example
    ///
    /// ```
    /// use sortie::harness::RunResult;
    /// use std::time::Duration;
    ///
    /// let result = RunResult {
    ///     total_tests: 10,
    ///     passed: 7,
    ///     failed: 0,
    ///     skipped: 3,
    ///     duration: Duration::from_secs(60),
    ///     results: vec![],
    /// };
    ///
    /// assert!(result.success());
    /// assert_eq!(result.exit_code(), 0);
    /// ```
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Returns an appropriate process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Tunables for a [`Harness`].
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Maximum number of tests running at once. Values below 1 count as 1.
    pub parallel: usize,

    /// Default time budget per test, from cluster request to end of body.
    pub test_timeout: Duration,

    /// Time budget for destroying one test's cluster.
    pub teardown_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

impl From<&HarnessConfig> for HarnessOptions {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            parallel: config.parallel,
            test_timeout: Duration::from_secs(config.test_timeout_secs),
            teardown_timeout: Duration::from_secs(config.teardown_timeout_secs),
        }
    }
}

/// Drives selected tests against one flight.
///
/// # Type Parameters
///
/// - `F`: the backend flight (implements [`Flight`])
/// - `R`: the reporter type (implements [`Reporter`])
pub struct Harness<F, R> {
    flight: F,
    reporter: R,
    options: HarnessOptions,
    cancel: CancellationToken,
}

impl<F, R> Harness<F, R>
where
    F: Flight,
    R: Reporter,
{
    pub fn new(flight: F, reporter: R, options: HarnessOptions) -> Self {
        Self {
            flight,
            reporter,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the token that aborts the run.
    ///
    /// Once cancelled, in-flight tests fail with `cancelled` (their
    /// clusters are still torn down) and tests not yet started fail
    /// immediately without provisioning.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn flight(&self) -> &F {
        &self.flight
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Selects and runs every registered test.
    ///
    /// Individual test failures never fail the run; the returned
    /// [`RunResult`] carries one result per registered descriptor in
    /// registration order. Skipped descriptors cause no backend calls.
    ///
    /// # Errors
    ///
    /// Only if selection itself is impossible (see [`select`]).
    pub async fn run(&self, registry: &Registry, target: &Target) -> Result<RunResult, SelectError> {
        let start = std::time::Instant::now();
        let selection = select(registry, target)?;

        let listing: Vec<Listing> = selection
            .iter()
            .map(|(d, s)| Listing {
                name: d.name().to_string(),
                selection: *s,
            })
            .collect();
        self.reporter.on_selection(&listing).await;

        let eligible = selection.iter().filter(|(_, s)| s.is_eligible()).count();
        info!(
            "Selected {} of {} tests for {}/{}/{}",
            eligible,
            selection.len(),
            target.platform(),
            target.distro(),
            target.arch()
        );
        if target.platform() != self.flight.platform() {
            warn!(
                "Target platform {} differs from flight platform {}",
                target.platform(),
                self.flight.platform()
            );
        }

        let mut results: Vec<(usize, TestResult)> =
            futures::stream::iter(selection.into_iter().enumerate())
                .map(|(idx, (descriptor, selection))| async move {
                    let result = match selection {
                        Selection::Skip(reason) => {
                            debug!("Skipping {}: {}", descriptor.name(), reason);
                            TestResult::skip(descriptor.name(), reason)
                        }
                        Selection::Eligible => {
                            self.reporter.on_test_start(descriptor.name()).await;
                            self.execute_one(descriptor).await
                        }
                    };
                    self.reporter.on_test_complete(&result).await;
                    (idx, result)
                })
                .buffer_unordered(self.options.parallel.max(1))
                .collect()
                .await;

        results.sort_by_key(|(idx, _)| *idx);
        let results = results.into_iter().map(|(_, r)| r).collect();

        let run_result = RunResult::from_results(results, start.elapsed());
        self.reporter.on_run_complete(&run_result).await;

        Ok(run_result)
    }

    /// Runs one descriptor through provision, body and teardown.
    ///
    /// Never fails: every error is folded into the returned result.
    pub async fn execute_one(&self, descriptor: &Descriptor) -> TestResult {
        let span = info_span!("test", name = descriptor.name());
        self.execute_inner(descriptor).instrument(span).await
    }

    async fn execute_inner(&self, descriptor: &Descriptor) -> TestResult {
        let start = std::time::Instant::now();
        let name = descriptor.name();
        let timeout = descriptor.timeout().unwrap_or(self.options.test_timeout);
        let deadline = Instant::now() + timeout;

        let runtime = descriptor.runtime_config();
        let cluster = match self
            .bounded(
                deadline,
                timeout,
                self.flight.new_cluster(&runtime).map_err(TestFailure::from),
            )
            .await
        {
            Ok(cluster) => cluster,
            Err(failure) => {
                error!("Failed to create cluster for {}: {}", name, failure);
                return TestResult::fail(name, &failure, start.elapsed());
            }
        };
        debug!("Created cluster {}", cluster.id());

        let machine_config = MachineConfig {
            user_data: descriptor.user_data().map(str::to_string),
        };
        let provision = futures::future::try_join_all(
            (0..descriptor.cluster_size()).map(|_| cluster.new_machine(&machine_config)),
        )
        .map_ok(|_| ())
        .map_err(TestFailure::from);

        let handle = TestCluster::new(name, Arc::clone(&cluster));
        let outcome = match self.bounded(deadline, timeout, provision).await {
            Ok(()) => {
                let body = async { descriptor.run(&handle).await };
                self.bounded(deadline, timeout, body).await
            }
            Err(failure) => {
                error!("Failed to provision machines for {}: {}", name, failure);
                Err(failure)
            }
        };
        drop(handle);

        self.teardown(cluster.as_ref()).await;

        match outcome {
            Ok(()) => {
                info!("{} passed", name);
                TestResult::pass(name, start.elapsed())
            }
            Err(failure) => {
                error!("{} failed: {}", name, failure);
                TestResult::fail(name, &failure, start.elapsed())
            }
        }
    }

    /// Runs `fut` until it completes, the deadline passes or the run is
    /// cancelled, whichever comes first. A panic in `fut` becomes
    /// `TestFailure::Panic`.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        timeout: Duration,
        fut: impl Future<Output = Result<T, TestFailure>>,
    ) -> Result<T, TestFailure> {
        let fut = AssertUnwindSafe(fut).catch_unwind().map(|result| {
            result.unwrap_or_else(|payload| {
                Err(TestFailure::Panic(panic_message(payload.as_ref())))
            })
        });
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TestFailure::Cancelled),
            result = tokio::time::timeout_at(deadline, fut) => {
                result.unwrap_or(Err(TestFailure::Timeout(timeout)))
            }
        }
    }

    async fn teardown(&self, cluster: &dyn Cluster) {
        let limit = self.options.teardown_timeout;
        let destroy = AssertUnwindSafe(cluster.destroy()).catch_unwind();
        match tokio::time::timeout(limit, destroy).await {
            Ok(Ok(Ok(()))) => debug!("Destroyed cluster {}", cluster.id()),
            Ok(Ok(Err(e))) => warn!("Failed to destroy cluster {}: {}", cluster.id(), e),
            Ok(Err(payload)) => warn!(
                "Teardown of cluster {} panicked: {}",
                cluster.id(),
                panic_message(payload.as_ref())
            ),
            Err(_) => warn!(
                "Teardown of cluster {} timed out after {:?}",
                cluster.id(),
                limit
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "(non-string panic)".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::config::LocalPlatformConfig;
    use crate::platform::local::LocalFlight;
    use crate::register::empty;
    use crate::report::NullReporter;
    use crate::testing::StubFlight;

    fn harness(flight: StubFlight) -> Harness<StubFlight, NullReporter> {
        harness_with(flight, Duration::from_secs(30), Duration::from_secs(5))
    }

    fn harness_with(
        flight: StubFlight,
        test_timeout: Duration,
        teardown_timeout: Duration,
    ) -> Harness<StubFlight, NullReporter> {
        Harness::new(
            flight,
            NullReporter,
            HarnessOptions {
                parallel: 4,
                test_timeout,
                teardown_timeout,
            },
        )
    }

    fn closed(descriptors: Vec<Descriptor>) -> Registry {
        let mut registry = Registry::new();
        for d in descriptors {
            registry.register(d).unwrap();
        }
        registry.close();
        registry
    }

    fn target() -> Target {
        Target::new("stub", "rhcos", "x86_64")
    }

    async fn boom(c: &TestCluster) -> Result<(), TestFailure> {
        Err(c.fatal("boom"))
    }

    async fn kaboom(_c: &TestCluster) -> Result<(), TestFailure> {
        panic!("kaboom")
    }

    async fn echo_on_first(c: &TestCluster) -> Result<(), TestFailure> {
        let m = c.machine(0)?;
        let out = c.must_ssh(m.as_ref(), "echo hello").await?;
        c.must_match("^hello", &out)
    }

    #[tokio::test]
    async fn test_passing_test() {
        let h = harness(StubFlight::new());
        let d = Descriptor::new("x", empty).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Pass);
        assert!(result.message.is_none());
        assert_eq!(h.flight().cluster_calls(), 1);
        assert_eq!(h.flight().machine_calls(), 1);
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_fatal_assertion_fails_and_tears_down() {
        let h = harness(StubFlight::new());
        let d = Descriptor::new("y", |c| boom(c).boxed()).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        let message = result.message.unwrap();
        assert!(message.contains("boom"));
        assert!(message.starts_with("fatal:"));
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_body_uses_machines() {
        let h = harness(StubFlight::new());
        let d = Descriptor::new("echo", |c| echo_on_first(c).boxed()).with_cluster_size(2);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Pass, "{:?}", result.message);
        assert_eq!(h.flight().machine_calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_cluster_provisions_no_machines() {
        let h = harness(StubFlight::new());
        let d = Descriptor::new("nothing", empty);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(h.flight().machine_calls(), 0);
    }

    #[tokio::test]
    async fn test_cluster_creation_failure() {
        let h = harness(StubFlight::new().failing_clusters());
        let d = Descriptor::new("x", empty).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.message.unwrap().starts_with("infra: Failed to provision"));
        assert_eq!(h.flight().machine_calls(), 0);
    }

    #[tokio::test]
    async fn test_machine_provisioning_failure_still_tears_down() {
        let h = harness(StubFlight::new().failing_machines_after(1));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let d = Descriptor::new("big", move |_c| {
            flag.store(true, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        })
        .with_cluster_size(3);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_infra_error_in_body() {
        async fn body(c: &TestCluster) -> Result<(), TestFailure> {
            let m = c.machine(0)?;
            c.must_ssh(m.as_ref(), "fail").await?;
            Ok(())
        }

        let h = harness(StubFlight::new());
        let d = Descriptor::new("infra", |c| body(c).boxed()).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.message.unwrap().starts_with("infra:"));
        assert_eq!(h.flight().live_clusters(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let h = harness(StubFlight::new());
        let d = Descriptor::new("panics", |c| kaboom(c).boxed()).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.message.as_deref(), Some("panic: kaboom"));
        assert_eq!(h.flight().live_clusters(), 0);
    }

    #[tokio::test]
    async fn test_backend_panic_is_isolated() {
        let h = harness(StubFlight::new().panicking_cluster_creation());
        let registry = closed(vec![
            Descriptor::new("a", empty).with_cluster_size(1),
            Descriptor::new("b", empty).with_cluster_size(1),
        ]);

        let run = h.run(&registry, &target()).await.unwrap();

        assert_eq!((run.passed, run.failed), (1, 1));
        let failed = run
            .results
            .iter()
            .find(|r| r.status == TestStatus::Fail)
            .unwrap();
        assert_eq!(failed.message.as_deref(), Some("panic: backend bug"));
        assert_eq!(h.flight().live_clusters(), 0);
    }

    #[tokio::test]
    async fn test_teardown_panic_keeps_status() {
        let h = harness(StubFlight::new().panicking_teardown());
        let d = Descriptor::new("x", empty).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(h.flight().live_clusters(), 1);

        h.flight().destroy().await.unwrap();
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_reboot_timeout_is_infra_failure() {
        async fn body(c: &TestCluster) -> Result<(), TestFailure> {
            let m = c.machine(0)?;
            m.reboot().await?;
            Ok(())
        }

        let config = LocalPlatformConfig {
            shell: "/nonexistent-shell".to_string(),
            reboot_timeout_secs: 0,
            ..Default::default()
        };
        let h = Harness::new(
            LocalFlight::new(&config).unwrap(),
            NullReporter,
            HarnessOptions::default(),
        );
        let d = Descriptor::new("reboot", |c| body(c).boxed()).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        let message = result.message.unwrap();
        assert!(message.starts_with("infra:"), "{}", message);
        assert!(message.contains("after reboot"));
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(std::fs::read_dir(h.flight().root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_cancels_body_and_tears_down() {
        async fn body(c: &TestCluster) -> Result<(), TestFailure> {
            let m = c.machine(0)?;
            c.must_ssh(m.as_ref(), "hang").await?;
            Ok(())
        }

        let h = harness(StubFlight::new());
        let d = Descriptor::new("slow", |c| body(c).boxed())
            .with_cluster_size(1)
            .with_timeout(Duration::from_millis(200));

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.message.unwrap().starts_with("timeout after 200ms"));
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_teardown_timeout_keeps_status() {
        let h = harness_with(
            StubFlight::new().hanging_teardown(),
            Duration::from_secs(30),
            Duration::from_millis(100),
        );
        let d = Descriptor::new("x", empty).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(h.flight().live_clusters(), 1);

        // Leaked clusters are still reclaimed by the flight.
        h.flight().destroy().await.unwrap();
        assert_eq!(h.flight().live_clusters(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let token = CancellationToken::new();
        token.cancel();
        let h = harness(StubFlight::new()).with_cancellation_token(token);
        let d = Descriptor::new("x", empty).with_cluster_size(1);

        let result = h.execute_one(&d).await;
        assert_eq!(result.status, TestStatus::Fail);
        assert_eq!(result.message.as_deref(), Some("cancelled"));
        assert_eq!(h.flight().live_clusters(), 0);
    }

    #[tokio::test]
    async fn test_skipped_tests_never_provision() {
        let h = harness(StubFlight::new());
        let registry = closed(vec![
            Descriptor::new("z", empty).with_platforms(["qemu"]),
            Descriptor::new("w", empty).with_exclude_platforms(["cloud"]),
        ]);

        let run = h
            .run(&registry, &Target::new("cloud", "rhcos", "x86_64"))
            .await
            .unwrap();
        assert_eq!(run.skipped, 2);
        assert_eq!(run.results[0].message.as_deref(), Some("platform mismatch"));
        assert_eq!(run.results[1].message.as_deref(), Some("platform excluded"));
        assert_eq!(h.flight().cluster_calls(), 0);
        assert!(run.success());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_order_preserved() {
        let h = harness(StubFlight::new());
        let registry = closed(vec![
            Descriptor::new("a", |c| boom(c).boxed()).with_cluster_size(1),
            Descriptor::new("b", |c| echo_on_first(c).boxed()).with_cluster_size(1),
            Descriptor::new("c", |c| kaboom(c).boxed()),
            Descriptor::new("d", empty).with_platforms(["qemu"]),
            Descriptor::new("e", empty).with_cluster_size(2),
        ]);

        let run = h.run(&registry, &target()).await.unwrap();

        let statuses: Vec<_> = run.results.iter().map(|r| (r.name.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            [
                ("a", TestStatus::Fail),
                ("b", TestStatus::Pass),
                ("c", TestStatus::Fail),
                ("d", TestStatus::Skip),
                ("e", TestStatus::Pass),
            ]
        );
        assert_eq!((run.passed, run.failed, run.skipped), (2, 2, 1));
        assert_eq!(run.total_tests, 5);
        assert_eq!(run.exit_code(), 1);
        assert_eq!(h.flight().cluster_calls(), 4);
        assert_eq!(h.flight().live_clusters(), 0);
        assert_eq!(h.flight().live_machines(), 0);
    }

    #[tokio::test]
    async fn test_run_requires_usable_registry() {
        let h = harness(StubFlight::new());
        let mut open = Registry::new();
        open.register(Descriptor::new("x", empty)).unwrap();
        assert!(matches!(
            h.run(&open, &target()).await,
            Err(SelectError::RegistryOpen)
        ));
    }

    #[test]
    fn test_exit_codes() {
        let ok = RunResult::from_results(
            vec![
                TestResult::pass("a", Duration::ZERO),
                TestResult::skip("b", SkipReason::NameFilter),
            ],
            Duration::ZERO,
        );
        assert_eq!(ok.exit_code(), 0);

        let bad = RunResult::from_results(
            vec![TestResult::fail(
                "a",
                &TestFailure::Fatal("x".to_string()),
                Duration::ZERO,
            )],
            Duration::ZERO,
        );
        assert_eq!(bad.exit_code(), 1);
    }
}
