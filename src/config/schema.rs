//! Configuration schema definitions for sortie.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every section has defaults, so an empty file
//! is a valid configuration that runs on the local platform.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── HarnessConfig          - Parallelism and timeouts
//! ├── TargetConfig           - Distro, architecture, name patterns
//! ├── PlatformConfig         - Tagged enum selecting the backend
//! │   └── Local              - Machines as local state directories
//! └── ReportConfig           - Output and reporting settings
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::register::Flag;

/// Root configuration structure for sortie.
///
/// # TOML Structure
///
/// ```toml
/// [harness]
/// parallel = 4
/// test_timeout_secs = 600
///
/// [target]
/// distro = "rhcos"
/// patterns = ["basic.*"]
///
/// [platform]
/// type = "local"
///
/// [report]
/// output_dir = "_sortie"
/// ```
///
/// # Example
///
/// ```
/// use sortie::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [harness]
///     parallel = 2
///
///     [platform]
///     type = "local"
/// "#).unwrap();
/// assert_eq!(config.harness.parallel, 2);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Parallelism and timeouts.
    #[serde(default)]
    pub harness: HarnessConfig,

    /// What environment the run targets.
    #[serde(default)]
    pub target: TargetConfig,

    /// Which backend provisions machines.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Report configuration for output generation.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `parallel` | 10 |
/// | `test_timeout_secs` | 1800 (30 minutes) |
/// | `teardown_timeout_secs` | 300 (5 minutes) |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Maximum number of tests running at once.
    ///
    /// Values below 1 are treated as 1.
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Timeout for one test, covering provisioning and the test body.
    ///
    /// A descriptor may override it with its own timeout.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,

    /// Upper bound on tearing down one test's cluster.
    ///
    /// A teardown that exceeds it is reported but does not change the
    /// test's result.
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            test_timeout_secs: default_test_timeout(),
            teardown_timeout_secs: default_teardown_timeout(),
        }
    }
}

fn default_parallel() -> usize {
    10
}

fn default_test_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_teardown_timeout() -> u64 {
    300
}

/// Description of the environment under test.
///
/// The platform identifier is not configured here: it always comes from
/// the backend selected in [`PlatformConfig`].
///
/// # Example
///
/// ```toml
/// [target]
/// distro = "fcos"
/// arch = "aarch64"
/// patterns = ["coreos.ignition.*"]
/// exclude_flags = ["requires-internet-access"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Distribution identifier.
    ///
    /// Default: `rhcos`
    #[serde(default = "default_distro")]
    pub distro: String,

    /// CPU architecture. Defaults to the host's.
    pub arch: Option<String>,

    /// Test-name glob patterns. Empty selects every test.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Tests carrying any of these flags are skipped.
    #[serde(default)]
    pub exclude_flags: Vec<Flag>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            distro: default_distro(),
            arch: None,
            patterns: Vec::new(),
            exclude_flags: Vec::new(),
        }
    }
}

fn default_distro() -> String {
    "rhcos".to_string()
}

/// Backend configuration.
///
/// This is a tagged enum that selects the backend based on the `type`
/// field in TOML.
///
/// | Type | Description |
/// |------|-------------|
/// | `local` | Machines are local state directories |
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlatformConfig {
    /// Run machines as local state directories.
    Local(LocalPlatformConfig),
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig::Local(LocalPlatformConfig::default())
    }
}

/// Configuration for the local platform.
///
/// # Example
///
/// ```toml
/// [platform]
/// type = "local"
/// state_dir = "/var/tmp/sortie"
/// shell = "/bin/bash"
/// reboot_timeout_secs = 60
///
/// [platform.env]
/// LANG = "C.UTF-8"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalPlatformConfig {
    /// Where machine state directories are created. `~` is expanded.
    ///
    /// If not specified, a temporary directory is used and removed when
    /// the flight is dropped.
    pub state_dir: Option<PathBuf>,

    /// Shell used to run commands: `{shell} -c "{command}"`.
    ///
    /// Default: `/bin/sh`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Environment variables set for every command.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// How long a rebooted machine may take to answer again.
    ///
    /// Default: 300
    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout_secs: u64,
}

impl Default for LocalPlatformConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            shell: default_shell(),
            env: HashMap::new(),
            reboot_timeout_secs: default_reboot_timeout(),
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_reboot_timeout() -> u64 {
    300
}

/// Report generation settings.
///
/// # Example
///
/// ```toml
/// [report]
/// output_dir = "_sortie"
/// junit = true
/// junit_file = "junit.xml"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory for report files.
    ///
    /// Default: `_sortie`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Whether to write a JUnit XML report.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub junit: bool,

    /// File name of the JUnit report inside `output_dir`.
    ///
    /// Default: `junit.xml`
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            junit: true,
            junit_file: default_junit_file(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("_sortie")
}

fn default_true() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}
