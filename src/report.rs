//! Test reporting and output generation.
//!
//! The harness calls a [`Reporter`] as a run progresses. This module
//! provides a progress-bar console reporter and, in [`junit`], a JUnit
//! XML writer; [`MultiReporter`] fans events out to several of them.

pub mod junit;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::harness::{RunResult, TestResult, TestStatus};
use crate::selector::Listing;

pub use junit::JUnitReporter;

/// A test reporter receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once with every registered test and its selection verdict.
    async fn on_selection(&self, listing: &[Listing]);

    /// Called when an eligible test starts provisioning.
    async fn on_test_start(&self, name: &str);

    /// Called when a test completes, including skipped tests.
    async fn on_test_complete(&self, result: &TestResult);

    /// Called when all tests have completed.
    async fn on_run_complete(&self, result: &RunResult);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_selection(&self, _listing: &[Listing]) {}
    async fn on_test_start(&self, _name: &str) {}
    async fn on_test_complete(&self, _result: &TestResult) {}
    async fn on_run_complete(&self, _result: &RunResult) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    /// Create a new multi-reporter.
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Add a reporter to the multi-reporter.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_selection(&self, listing: &[Listing]) {
        for reporter in &self.reporters {
            reporter.on_selection(listing).await;
        }
    }

    async fn on_test_start(&self, name: &str) {
        for reporter in &self.reporters {
            reporter.on_test_start(name).await;
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        for reporter in &self.reporters {
            reporter.on_test_complete(result).await;
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        for reporter in &self.reporters {
            reporter.on_run_complete(result).await;
        }
    }
}

/// Console reporter that shows progress in the terminal.
///
/// Failures are always printed as they happen; passes and skips only in
/// verbose mode.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match progress.as_ref() {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_selection(&self, listing: &[Listing]) {
        let eligible = listing.iter().filter(|l| l.selection.is_eligible()).count();
        println!(
            "Selected {} of {} registered tests",
            eligible,
            listing.len()
        );

        let pb = indicatif::ProgressBar::new(listing.len() as u64);
        match indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            Ok(style) => pb.set_style(style.progress_chars("#>-")),
            Err(e) => tracing::debug!("Invalid progress template: {}", e),
        }

        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    async fn on_test_start(&self, name: &str) {
        if self.verbose {
            self.println(format!("Running: {}", name));
        }
    }

    async fn on_test_complete(&self, result: &TestResult) {
        let status = match result.status {
            TestStatus::Pass => console::style(result.status.as_str()).green(),
            TestStatus::Fail => console::style(result.status.as_str()).red(),
            TestStatus::Skip => console::style(result.status.as_str()).yellow(),
        };

        if self.verbose || result.status == TestStatus::Fail {
            let mut line = format!("{} {} ({:.1?})", status, result.name, result.duration);
            if let Some(msg) = &result.message {
                line.push_str(&format!("\n    {}", console::style(msg).dim()));
            }
            self.println(line);
        }

        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, result: &RunResult) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pb.finish_and_clear();
        }

        print_summary(result);
    }
}

/// Prints a summary of test results to the console.
pub fn print_summary(result: &RunResult) {
    println!();
    println!("Test Results:");
    println!("  Total:   {}", result.total_tests);
    println!("  Passed:  {}", console::style(result.passed).green());
    println!("  Failed:  {}", console::style(result.failed).red());
    println!("  Skipped: {}", console::style(result.skipped).yellow());
    println!("  Duration: {:?}", result.duration);

    if result.success() {
        println!();
        println!("{}", console::style("All tests passed!").green().bold());
        return;
    }

    println!();
    println!("{}", console::style("Some tests failed.").red().bold());
    println!();
    println!("Failed tests:");
    for r in result.results.iter().filter(|r| r.status == TestStatus::Fail) {
        println!("  - {}", r.name);
        if let Some(msg) = &r.message {
            println!("    {}", console::style(msg).dim());
        }
    }
}
