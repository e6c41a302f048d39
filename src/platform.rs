//! Flight, cluster and machine capabilities.
//!
//! This module defines the backend seam. A test body is written once
//! against [`Cluster`] and [`Machine`] and runs unchanged on any backend
//! that supplies a [`Flight`].
//!
//! # Architecture
//!
//! Ownership is a three-level chain:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Flight                              │
//! │  (one per backend/platform, shared by every test)           │
//! │                                                              │
//! │  new_cluster(RuntimeConfig) ──────► Cluster                 │
//! │  destroy()   (destroys every cluster it created)            │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Cluster                             │
//! │  (owned by exactly one test)                                 │
//! │                                                              │
//! │  new_machine(MachineConfig) ──────► Machine                 │
//! │  machines() / remove_machine(id) / run_all(command)         │
//! │  destroy()   (destroys its machines, leaves the flight)     │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Machine                             │
//! │                                                              │
//! │  execute(command) ───► ExecOutput                           │
//! │  reboot()   (blocks until reachable again)                  │
//! │  console() / destroy()                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every `destroy()` is idempotent. The bookkeeping shared by all
//! backends lives in [`base`]; concrete backends wrap it and override
//! only provisioning.
//!
//! # Built-in Backends
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | Local | [`local`] | Machines are private state directories driven through a local shell |

pub mod base;
pub mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors raised by flight, cluster and machine capabilities.
///
/// A command that runs and exits non-zero is NOT an error at the
/// [`Machine::execute`] level; callers that require success convert the
/// status into [`PlatformError::NonZeroExit`].
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Creating a cluster or machine failed.
    #[error("Failed to provision: {0}")]
    Provision(String),

    /// A command could not be started or its session broke down.
    #[error("Failed to execute `{command}` on {machine}: {reason}")]
    Execution {
        machine: String,
        command: String,
        reason: String,
    },

    /// A command ran but exited with a non-zero status.
    #[error("`{command}` on {machine} exited with status {status}: {stderr}")]
    NonZeroExit {
        machine: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// The execution channel to a machine could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A rebooted machine did not come back in time.
    #[error("{machine} did not become reachable within {timeout:?} after reboot")]
    RebootTimeout { machine: String, timeout: Duration },

    /// The resource was already destroyed.
    #[error("{0} has been destroyed")]
    Destroyed(String),

    /// I/O error from the backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Provisioning options derived from a test's flags.
///
/// Handed to [`Flight::new_cluster`]; backends decide how each option
/// changes the environment they create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Do not inject SSH keys through the boot configuration.
    pub no_ssh_key_in_user_data: bool,

    /// Do not inject SSH keys through platform metadata.
    pub no_ssh_key_in_metadata: bool,

    /// Skip the post-boot check for an emergency shell.
    pub no_emergency_shell_check: bool,

    /// The test needs outbound internet access.
    pub requires_internet: bool,
}

/// Per-machine provisioning options.
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    /// Boot configuration document. Opaque to the harness.
    pub user_data: Option<String>,
}

/// Output of a command executed on a machine.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit status. 0 means success.
    pub status: i32,

    /// Captured standard output.
    pub stdout: Vec<u8>,

    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    /// Returns `true` if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Standard error decoded lossily, trimmed of trailing whitespace.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_string()
    }
}

/// A single provisioned machine.
///
/// Commands issued through one `Machine` handle are serialized by the
/// implementation. After [`reboot`](Self::reboot) returns, any session
/// from the previous boot is discarded and later commands observe the
/// post-reboot state.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Stable identifier, preserved across reboots.
    fn id(&self) -> &str;

    /// Transient network address of the machine.
    fn address(&self) -> String;

    /// Runs a command and collects its output.
    async fn execute(&self, command: &str) -> PlatformResult<ExecOutput>;

    /// Reboots the machine and blocks until it is reachable again.
    ///
    /// # Errors
    ///
    /// - `PlatformError::RebootTimeout` - the machine did not come back
    async fn reboot(&self) -> PlatformResult<()>;

    /// Returns captured console output. May be empty.
    async fn console(&self) -> PlatformResult<String>;

    /// Releases the machine. Idempotent.
    async fn destroy(&self) -> PlatformResult<()>;
}

/// An ordered set of machines forming one test's environment.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Identifier used in logs and state paths.
    fn id(&self) -> &str;

    /// Provisions a new machine and adds it to this cluster.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Provision` - the backend could not create it
    /// - `PlatformError::Destroyed` - the cluster was already destroyed
    async fn new_machine(&self, config: &MachineConfig) -> PlatformResult<Arc<dyn Machine>>;

    /// Machines in provisioning order.
    fn machines(&self) -> Vec<Arc<dyn Machine>>;

    /// Destroys one machine and drops it from the cluster.
    ///
    /// Removing an id the cluster does not hold is a no-op.
    async fn remove_machine(&self, id: &str) -> PlatformResult<()>;

    /// Runs a command on every machine concurrently.
    ///
    /// Results come back in machine order, paired with the machine id.
    async fn run_all(&self, command: &str) -> Vec<(String, PlatformResult<ExecOutput>)> {
        let machines = self.machines();
        futures::future::join_all(machines.iter().map(|m| async move {
            (m.id().to_string(), m.execute(command).await)
        }))
        .await
    }

    /// Destroys every machine and detaches from the owning flight.
    /// Idempotent.
    async fn destroy(&self) -> PlatformResult<()>;
}

/// Backend-scoped factory and owner of clusters.
///
/// Flights are shared by all concurrently running tests, so
/// [`new_cluster`](Self::new_cluster) must be safe to call concurrently.
#[async_trait]
pub trait Flight: Send + Sync {
    /// Platform identifier the selector matches against (e.g. `local`).
    fn platform(&self) -> &str;

    /// Creates a new, empty cluster owned by this flight.
    async fn new_cluster(&self, config: &RuntimeConfig) -> PlatformResult<Arc<dyn Cluster>>;

    /// Number of clusters created and not yet destroyed.
    fn live_clusters(&self) -> usize;

    /// Destroys every cluster this flight created. Idempotent.
    async fn destroy(&self) -> PlatformResult<()>;
}
