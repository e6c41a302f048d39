//! In-memory flight used by unit tests.
//!
//! Built on the same [`FlightBase`]/[`ClusterBase`] bookkeeping as the
//! real backends and counts every provisioning call, so tests can check
//! that clusters are torn down and that skipped tests never provision.
//!
//! Machines understand a handful of commands:
//!
//! | Command | Behavior |
//! |---------|----------|
//! | `echo <text>` | prints `<text>` |
//! | `state` | prints the boot counter, which only changes on reboot |
//! | `fail` | exits 1 |
//! | `hang` | never completes |
//! | anything else | exits 127 |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::platform::base::{ClusterBase, FlightBase};
use crate::platform::{
    Cluster, ExecOutput, Flight, Machine, MachineConfig, PlatformError, PlatformResult,
    RuntimeConfig,
};

#[derive(Default)]
struct Counters {
    cluster_calls: AtomicUsize,
    machine_calls: AtomicUsize,
    live_machines: AtomicUsize,
    next_id: AtomicUsize,
    panicked: AtomicBool,
}

#[derive(Clone, Copy, Default)]
struct Behavior {
    fail_clusters: bool,
    fail_machines_after: Option<usize>,
    hang_on_destroy: bool,
    panic_on_new_cluster: bool,
    panic_on_destroy: bool,
}

pub struct StubFlight {
    base: Arc<FlightBase>,
    counters: Arc<Counters>,
    behavior: Behavior,
}

impl StubFlight {
    pub fn new() -> Self {
        Self::with_platform("stub")
    }

    pub fn with_platform(platform: &str) -> Self {
        Self {
            base: FlightBase::new(platform),
            counters: Arc::new(Counters::default()),
            behavior: Behavior::default(),
        }
    }

    /// Every `new_cluster` call fails.
    pub fn failing_clusters(mut self) -> Self {
        self.behavior.fail_clusters = true;
        self
    }

    /// `new_machine` fails once `n` machines exist in a cluster.
    pub fn failing_machines_after(mut self, n: usize) -> Self {
        self.behavior.fail_machines_after = Some(n);
        self
    }

    /// The first teardown of each cluster never completes; later ones do.
    pub fn hanging_teardown(mut self) -> Self {
        self.behavior.hang_on_destroy = true;
        self
    }

    /// The first `new_cluster` call of the flight panics.
    pub fn panicking_cluster_creation(mut self) -> Self {
        self.behavior.panic_on_new_cluster = true;
        self
    }

    /// The first cluster teardown of the flight panics.
    pub fn panicking_teardown(mut self) -> Self {
        self.behavior.panic_on_destroy = true;
        self
    }

    pub fn cluster_calls(&self) -> usize {
        self.counters.cluster_calls.load(Ordering::SeqCst)
    }

    pub fn machine_calls(&self) -> usize {
        self.counters.machine_calls.load(Ordering::SeqCst)
    }

    pub fn live_machines(&self) -> usize {
        self.counters.live_machines.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Flight for StubFlight {
    fn platform(&self) -> &str {
        self.base.platform()
    }

    async fn new_cluster(&self, _config: &RuntimeConfig) -> PlatformResult<Arc<dyn Cluster>> {
        self.counters.cluster_calls.fetch_add(1, Ordering::SeqCst);
        self.base.check_live()?;
        if self.behavior.panic_on_new_cluster && !self.counters.panicked.swap(true, Ordering::SeqCst)
        {
            panic!("backend bug");
        }
        if self.behavior.fail_clusters {
            return Err(PlatformError::Provision("no capacity".to_string()));
        }

        let id = self.counters.next_id.fetch_add(1, Ordering::SeqCst);
        let cluster: Arc<dyn Cluster> = Arc::new(StubCluster {
            base: ClusterBase::new(format!("stub-cluster-{}", id), &self.base),
            counters: Arc::clone(&self.counters),
            behavior: self.behavior,
            hung: AtomicBool::new(false),
        });
        self.base.add_cluster(Arc::clone(&cluster))?;
        Ok(cluster)
    }

    fn live_clusters(&self) -> usize {
        self.base.cluster_count()
    }

    async fn destroy(&self) -> PlatformResult<()> {
        self.base.destroy().await
    }
}

struct StubCluster {
    base: ClusterBase,
    counters: Arc<Counters>,
    behavior: Behavior,
    hung: AtomicBool,
}

#[async_trait]
impl Cluster for StubCluster {
    fn id(&self) -> &str {
        self.base.id()
    }

    async fn new_machine(&self, _config: &MachineConfig) -> PlatformResult<Arc<dyn Machine>> {
        self.counters.machine_calls.fetch_add(1, Ordering::SeqCst);
        self.base.check_live()?;
        if let Some(limit) = self.behavior.fail_machines_after
            && self.base.machines().len() >= limit
        {
            return Err(PlatformError::Provision("machine quota exceeded".to_string()));
        }

        let id = self.counters.next_id.fetch_add(1, Ordering::SeqCst);
        self.counters.live_machines.fetch_add(1, Ordering::SeqCst);
        let machine: Arc<dyn Machine> = Arc::new(StubMachine {
            id: format!("stub-machine-{}", id),
            boots: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        });
        self.base.add_machine(Arc::clone(&machine))?;
        Ok(machine)
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.base.machines()
    }

    async fn remove_machine(&self, id: &str) -> PlatformResult<()> {
        self.base.remove_machine(id).await.map(|_| ())
    }

    async fn destroy(&self) -> PlatformResult<()> {
        if self.behavior.hang_on_destroy && !self.hung.swap(true, Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.behavior.panic_on_destroy && !self.counters.panicked.swap(true, Ordering::SeqCst) {
            panic!("teardown bug");
        }
        self.base.destroy().await.map(|_| ())
    }
}

struct StubMachine {
    id: String,
    boots: AtomicU64,
    destroyed: AtomicBool,
    counters: Arc<Counters>,
}

#[async_trait]
impl Machine for StubMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> String {
        "10.0.0.1".to_string()
    }

    async fn execute(&self, command: &str) -> PlatformResult<ExecOutput> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PlatformError::Destroyed(self.id.clone()));
        }

        let (status, stdout, stderr) = match command {
            "state" => (0, format!("{}\n", self.boots.load(Ordering::SeqCst)), String::new()),
            "fail" => (1, String::new(), "failed".to_string()),
            "hang" => futures::future::pending().await,
            _ => match command.strip_prefix("echo ") {
                Some(text) => (0, format!("{}\n", text), String::new()),
                None => (127, String::new(), "command not found".to_string()),
            },
        };

        Ok(ExecOutput {
            status,
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
        })
    }

    async fn reboot(&self) -> PlatformResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PlatformError::Destroyed(self.id.clone()));
        }
        self.boots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn console(&self) -> PlatformResult<String> {
        Ok(format!("boot {}\n", self.boots.load(Ordering::SeqCst)))
    }

    async fn destroy(&self) -> PlatformResult<()> {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.counters.live_machines.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
