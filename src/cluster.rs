//! The cluster handle given to test bodies, and how they fail.
//!
//! A test body receives a [`TestCluster`] and returns a [`TestOutcome`].
//! Failing is a single-shot, hard abort: the body returns `Err` and the
//! `?` operator unwinds it to the harness boundary. Nothing outside the
//! failing test observes the abort.
//!
//! # Example
//!
//! ```no_run
//! use sortie::cluster::{TestCluster, TestOutcome};
//!
//! async fn cipher_check(c: &TestCluster) -> TestOutcome {
//!     let m = c.machine(0)?;
//!     let dump = c.must_ssh(m.as_ref(), "sudo cryptsetup luksDump /dev/vda4").await?;
//!     c.must_match("Cipher: *aes", &dump)?;
//!     c.must_not_match("Cipher: *cipher_null-ecb", &dump)?;
//!
//!     m.reboot().await?;
//!     let dump = c.must_ssh(m.as_ref(), "sudo cryptsetup luksDump /dev/vda4").await?;
//!     c.must_match("Cipher: *aes", &dump)
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;
use tracing::error;

use crate::platform::{Cluster, ExecOutput, Machine, PlatformError, PlatformResult};

/// What a test body returns.
pub type TestOutcome = Result<(), TestFailure>;

/// Why a test failed.
///
/// The display form is prefixed with the origin so reports can tell
/// test-author assertions apart from infrastructure problems.
#[derive(Debug, thiserror::Error)]
pub enum TestFailure {
    /// A fatal assertion raised by the test body.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A platform call failed during provisioning or inside the body.
    #[error("infra: {0}")]
    Infra(#[from] PlatformError),

    /// The test exceeded its time budget and was cancelled.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The test body panicked.
    #[error("panic: {0}")]
    Panic(String),

    /// The run was interrupted before the test finished.
    #[error("cancelled")]
    Cancelled,
}

/// Cluster handle scoped to one test body.
///
/// Wraps the backend cluster and adds the helpers test authors use:
/// command execution that fails the test on error, and regex assertions
/// over command output.
pub struct TestCluster {
    name: String,
    cluster: Arc<dyn Cluster>,
}

impl TestCluster {
    /// Wraps a provisioned cluster for the named test.
    pub fn new(name: impl Into<String>, cluster: Arc<dyn Cluster>) -> Self {
        Self {
            name: name.into(),
            cluster,
        }
    }

    /// Name of the running test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying backend cluster.
    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    /// Machines in provisioning order.
    pub fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.cluster.machines()
    }

    /// The machine at `index`, or a fatal failure if there is none.
    pub fn machine(&self, index: usize) -> Result<Arc<dyn Machine>, TestFailure> {
        self.machines().into_iter().nth(index).ok_or_else(|| {
            self.fatal(format!(
                "cluster has no machine {} (size {})",
                index,
                self.machines().len()
            ))
        })
    }

    /// Runs `command` on `machine` and returns its stdout.
    ///
    /// A non-zero exit is reported as `PlatformError::NonZeroExit`.
    pub async fn ssh(&self, machine: &dyn Machine, command: &str) -> PlatformResult<Vec<u8>> {
        let output = machine.execute(command).await?;
        into_stdout(machine.id(), command, output)
    }

    /// Like [`ssh`](Self::ssh), but any failure aborts the test.
    pub async fn must_ssh(
        &self,
        machine: &dyn Machine,
        command: &str,
    ) -> Result<Vec<u8>, TestFailure> {
        self.ssh(machine, command).await.map_err(|e| {
            error!("{}: {}", self.name, e);
            TestFailure::Infra(e)
        })
    }

    /// Runs `command` on every machine; any failure aborts the test.
    ///
    /// Returns stdout per machine, in machine order.
    pub async fn must_run_all(&self, command: &str) -> Result<Vec<Vec<u8>>, TestFailure> {
        let mut outputs = Vec::new();
        for (id, result) in self.cluster.run_all(command).await {
            let output = into_stdout(&id, command, result?)?;
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Builds a fatal failure with `message`.
    ///
    /// Return it from the body (`return Err(c.fatal(..))`) to abort.
    pub fn fatal(&self, message: impl Into<String>) -> TestFailure {
        let message = message.into();
        error!("{}: {}", self.name, message);
        TestFailure::Fatal(message)
    }

    /// Fails unless `pattern` matches somewhere in `output`.
    pub fn must_match(&self, pattern: &str, output: &[u8]) -> Result<(), TestFailure> {
        if self.matches(pattern, output)? {
            Ok(())
        } else {
            Err(self.fatal(format!(
                "Regexp {} did not match text: {}",
                pattern,
                String::from_utf8_lossy(output)
            )))
        }
    }

    /// Fails if `pattern` matches anywhere in `output`.
    pub fn must_not_match(&self, pattern: &str, output: &[u8]) -> Result<(), TestFailure> {
        if self.matches(pattern, output)? {
            Err(self.fatal(format!(
                "Regexp {} matched text: {}",
                pattern,
                String::from_utf8_lossy(output)
            )))
        } else {
            Ok(())
        }
    }

    fn matches(&self, pattern: &str, output: &[u8]) -> Result<bool, TestFailure> {
        let re = Regex::new(pattern)
            .map_err(|e| self.fatal(format!("Failed to match regexp {}: {}", pattern, e)))?;
        Ok(re.is_match(output))
    }
}

fn into_stdout(machine: &str, command: &str, output: ExecOutput) -> PlatformResult<Vec<u8>> {
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(PlatformError::NonZeroExit {
            machine: machine.to_string(),
            command: command.to_string(),
            status: output.status,
            stderr: output.stderr_lossy(),
        })
    }
}
