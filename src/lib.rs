//! sortie: integration-test orchestrator for ephemeral machine clusters.
//!
//! Test modules register declarative descriptors; the harness selects the
//! ones that apply to a target environment, provisions a fresh cluster of
//! machines for each, runs the test body against it and always tears the
//! cluster down again.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   register   │───►│   selector   │───►│   harness    │───► report
//! │  Descriptor  │    │  Eligible /  │    │ provision ►  │
//! │  Registry    │    │  Skip(reason)│    │ run ► destroy│
//! └──────────────┘    └──────────────┘    └──────┬───────┘
//!                                                │
//!                                                ▼
//!                                  platform: Flight ► Cluster ► Machine
//! ```
//!
//! - [`register`]: descriptors and the two-phase registry
//! - [`selector`]: pure eligibility rules for a [`selector::Target`]
//! - [`platform`]: the backend seam, shared bookkeeping and the local backend
//! - [`cluster`]: the handle test bodies receive and their assertion helpers
//! - [`harness`]: concurrent execution with isolation, timeouts and teardown
//! - [`report`]: console and JUnit XML output
//! - [`suite`]: the built-in end-to-end tests
//!
//! # Example
//!
//! ```no_run
//! use sortie::config::load_config;
//! use sortie::harness::{Harness, HarnessOptions};
//! use sortie::platform::local::LocalFlight;
//! use sortie::report::ConsoleReporter;
//! use sortie::selector::Target;
//! use sortie::{Registry, suite};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("sortie.toml"))?;
//!
//!     let mut registry = Registry::new();
//!     suite::register_all(&mut registry)?;
//!     registry.close();
//!
//!     let flight = LocalFlight::new(&Default::default())?;
//!     let harness = Harness::new(
//!         flight,
//!         ConsoleReporter::new(false),
//!         HarnessOptions::from(&config.harness),
//!     );
//!     let target = Target::new("local", &config.target.distro, sortie::util::host_arch());
//!     let result = harness.run(&registry, &target).await?;
//!
//!     std::process::exit(result.exit_code());
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod harness;
pub mod platform;
pub mod register;
pub mod report;
pub mod selector;
pub mod suite;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cluster::{TestCluster, TestFailure, TestOutcome};
pub use config::{Config, load_config};
pub use harness::{Harness, RunResult, TestResult, TestStatus};
pub use platform::{Cluster, Flight, Machine};
pub use register::{Descriptor, Flag, Registry};
pub use report::Reporter;
pub use selector::{Selection, Target, select};
