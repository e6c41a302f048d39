//! JUnit XML report generation.
//!
//! Writes one `<testsuite>` for the whole run. Test names are dotted
//! (`rhcos.luks.tpm`); everything before the last dot becomes the
//! `classname` so CI dashboards group related tests together.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" skipped="1" time="12.034">
//!   <testsuite name="sortie" tests="3" failures="1" errors="0" skipped="1" time="12.034" timestamp="2024-05-01T10:00:00">
//!     <testcase classname="basic" name="boot" time="4.210"/>
//!     <testcase classname="rhcos.luks" name="tpm" time="7.824">
//!       <failure message="fatal: Regexp Cipher: *aes did not match text: ..." type="fatal"/>
//!     </testcase>
//!     <testcase classname="coreos.ignition.v2.ssh" name="key" time="0.000">
//!       <skipped message="platform excluded"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! # Example
//!
//! ```
//! use sortie::report::JUnitReporter;
//!
//! let reporter = JUnitReporter::new("_sortie/junit.xml".into())
//!     .with_testsuite_name("rhcos-qemu");
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use super::Reporter;
use crate::harness::{RunResult, TestResult, TestStatus};
use crate::selector::Listing;

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created if they don't exist; an existing file
/// is overwritten.
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    /// Creates a new JUnit reporter that writes to the given path.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "sortie".to_string(),
        }
    }

    /// Sets the test suite name in the XML output. Defaults to `"sortie"`.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }

    /// Generate JUnit XML content from results.
    pub fn generate_xml(&self, run_result: &RunResult) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let tests = run_result.total_tests.to_string();
        let failures = run_result.failed.to_string();
        let skipped = run_result.skipped.to_string();
        let time = format!("{:.3}", run_result.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.as_str()));
        testsuites.push_attribute(("failures", failures.as_str()));
        testsuites.push_attribute(("skipped", skipped.as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.as_str()));
        testsuite.push_attribute(("failures", failures.as_str()));
        testsuite.push_attribute(("errors", "0"));
        testsuite.push_attribute(("skipped", skipped.as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute(("timestamp", timestamp.as_str()));
        writer.write_event(Event::Start(testsuite))?;

        for result in &run_result.results {
            write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    result: &TestResult,
) -> anyhow::Result<()> {
    let (classname, name) = split_name(&result.name);

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname));
    testcase.push_attribute(("name", name));
    testcase.push_attribute((
        "time",
        format!("{:.3}", result.duration.as_secs_f64()).as_str(),
    ));

    let message = result.message.as_deref().map(sanitize).unwrap_or_default();
    match result.status {
        TestStatus::Pass => {
            writer.write_event(Event::Empty(testcase))?;
        }
        TestStatus::Fail => {
            writer.write_event(Event::Start(testcase))?;

            let mut failure = BytesStart::new("failure");
            failure.push_attribute(("message", message.as_str()));
            failure.push_attribute(("type", failure_type(&message)));
            writer.write_event(Event::Empty(failure))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
        TestStatus::Skip => {
            writer.write_event(Event::Start(testcase))?;

            let mut skipped = BytesStart::new("skipped");
            skipped.push_attribute(("message", message.as_str()));
            writer.write_event(Event::Empty(skipped))?;

            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
        }
    }

    Ok(())
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_selection(&self, _listing: &[Listing]) {}

    async fn on_test_start(&self, _name: &str) {}

    async fn on_test_complete(&self, _result: &TestResult) {}

    async fn on_run_complete(&self, result: &RunResult) {
        let xml = match self.generate_xml(result) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
                return;
            }
        };

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::error!("Failed to create output directory: {}", e);
            return;
        }

        if let Err(e) = std::fs::write(&self.output_path, xml) {
            tracing::error!("Failed to write JUnit XML: {}", e);
        } else {
            tracing::info!("JUnit XML written to: {}", self.output_path.display());
        }
    }
}

/// Splits `a.b.c` into (`a.b`, `c`). Undotted names get classname `sortie`.
fn split_name(name: &str) -> (&str, &str) {
    name.rsplit_once('.').unwrap_or(("sortie", name))
}

/// The origin label of a failure diagnostic (`fatal`, `infra`, ...).
fn failure_type(message: &str) -> &str {
    message
        .split_once(':')
        .map(|(origin, _)| origin)
        .filter(|origin| !origin.contains(' '))
        .unwrap_or("failure")
}

/// Drops characters that are not allowed in XML 1.0 documents.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}
