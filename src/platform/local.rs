//! Local platform implementation.
//!
//! Machines on this platform are private state directories on the host.
//! Commands run through the configured shell with the machine directory
//! as working directory and `HOME`, so anything a test writes there
//! survives a reboot just like a disk would.
//!
//! # When to Use
//!
//! - **Development**: iterate on test bodies without booting VMs
//! - **Harness tests**: exercise provisioning, teardown and reboot flows
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | Filesystem only (shared network and process table) |
//! | Boot configuration | Written verbatim to `<machine>/user-data` |
//! | Reboot | New boot id, session re-established, state preserved |
//! | Console | `<machine>/console.log` |
//!
//! # Example Configuration
//!
//! ```toml
//! [platform]
//! type = "local"
//! state_dir = "~/.cache/sortie"
//! shell = "/bin/bash"
//!
//! [platform.env]
//! LANG = "C.UTF-8"
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::base::{ClusterBase, FlightBase};
use super::{
    Cluster, ExecOutput, Flight, Machine, MachineConfig, PlatformError, PlatformResult,
    RuntimeConfig,
};
use crate::config::LocalPlatformConfig;

/// Platform identifier of this backend.
pub const PLATFORM: &str = "local";

const REBOOT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONSOLE_FILE: &str = "console.log";
const USER_DATA_FILE: &str = "user-data";

/// Settings shared by every cluster and machine of one flight.
struct LocalSettings {
    shell: String,
    env: Vec<(String, String)>,
    reboot_timeout: Duration,
}

/// Flight whose machines are local state directories.
///
/// Without a configured `state_dir`, the flight works in a temporary
/// directory that is removed when the flight is dropped.
pub struct LocalFlight {
    base: Arc<FlightBase>,
    root: PathBuf,
    settings: Arc<LocalSettings>,
    _scratch: Option<tempfile::TempDir>,
}

impl LocalFlight {
    /// Creates a flight from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Provision` if the state directory cannot
    /// be created.
    pub fn new(config: &LocalPlatformConfig) -> PlatformResult<Self> {
        let (root, scratch) = match &config.state_dir {
            Some(dir) => {
                let expanded = shellexpand::tilde(&dir.to_string_lossy()).into_owned();
                let root = PathBuf::from(expanded).join(format!("flight-{}", short_id()));
                std::fs::create_dir_all(&root).map_err(|e| {
                    PlatformError::Provision(format!(
                        "failed to create state dir {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                (root, None)
            }
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix("sortie-")
                    .tempdir()
                    .map_err(|e| {
                        PlatformError::Provision(format!("failed to create scratch dir: {}", e))
                    })?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        let mut env: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        info!("Local flight state at {}", root.display());

        Ok(Self {
            base: FlightBase::new(PLATFORM),
            root,
            settings: Arc::new(LocalSettings {
                shell: config.shell.clone(),
                env,
                reboot_timeout: Duration::from_secs(config.reboot_timeout_secs),
            }),
            _scratch: scratch,
        })
    }

    /// Directory holding this flight's clusters.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Flight for LocalFlight {
    fn platform(&self) -> &str {
        self.base.platform()
    }

    async fn new_cluster(&self, config: &RuntimeConfig) -> PlatformResult<Arc<dyn Cluster>> {
        self.base.check_live()?;

        let id = format!("cluster-{}", short_id());
        let dir = self.root.join(&id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            PlatformError::Provision(format!("failed to create {}: {}", dir.display(), e))
        })?;

        if config.requires_internet {
            debug!("{} shares the host network", id);
        }

        let cluster: Arc<dyn Cluster> = Arc::new(LocalCluster {
            base: ClusterBase::new(id, &self.base),
            dir,
            settings: Arc::clone(&self.settings),
        });

        if let Err(e) = self.base.add_cluster(Arc::clone(&cluster)) {
            cluster.destroy().await.ok();
            return Err(e);
        }

        debug!("Created cluster {}", cluster.id());
        Ok(cluster)
    }

    fn live_clusters(&self) -> usize {
        self.base.cluster_count()
    }

    async fn destroy(&self) -> PlatformResult<()> {
        self.base.destroy().await
    }
}

/// Cluster of local machines.
///
/// Machine bookkeeping is delegated to [`ClusterBase`]; this type only
/// adds directory handling.
pub struct LocalCluster {
    base: ClusterBase,
    dir: PathBuf,
    settings: Arc<LocalSettings>,
}

#[async_trait]
impl Cluster for LocalCluster {
    fn id(&self) -> &str {
        self.base.id()
    }

    async fn new_machine(&self, config: &MachineConfig) -> PlatformResult<Arc<dyn Machine>> {
        self.base.check_live()?;

        let machine: Arc<dyn Machine> =
            Arc::new(LocalMachine::provision(&self.dir, Arc::clone(&self.settings), config).await?);

        if let Err(e) = self.base.add_machine(Arc::clone(&machine)) {
            machine.destroy().await.ok();
            return Err(e);
        }

        Ok(machine)
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.base.machines()
    }

    async fn remove_machine(&self, id: &str) -> PlatformResult<()> {
        self.base.remove_machine(id).await.map(|_| ())
    }

    async fn destroy(&self) -> PlatformResult<()> {
        if !self.base.destroy().await? {
            return Ok(());
        }
        remove_dir(&self.dir).await?;
        debug!("Destroyed cluster {}", self.base.id());
        Ok(())
    }
}

/// Marks the boot an execution session belongs to.
struct Session {
    boot_id: u64,
}

/// A machine backed by a local state directory.
pub struct LocalMachine {
    id: String,
    dir: PathBuf,
    settings: Arc<LocalSettings>,
    boot_id: AtomicU64,
    destroyed: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl LocalMachine {
    async fn provision(
        cluster_dir: &Path,
        settings: Arc<LocalSettings>,
        config: &MachineConfig,
    ) -> PlatformResult<Self> {
        let id = format!("machine-{}", short_id());
        let dir = cluster_dir.join(&id);

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            PlatformError::Provision(format!("failed to create {}: {}", dir.display(), e))
        })?;

        if let Some(user_data) = &config.user_data {
            tokio::fs::write(dir.join(USER_DATA_FILE), user_data)
                .await
                .map_err(|e| {
                    PlatformError::Provision(format!("failed to write user-data for {}: {}", id, e))
                })?;
        }

        let machine = Self {
            id,
            dir,
            settings,
            boot_id: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            session: Mutex::new(None),
        };
        machine.append_console("boot 0\n").await?;

        debug!("Provisioned {}", machine.id);
        Ok(machine)
    }

    /// Current boot id. Increases by one on every reboot.
    pub fn boot_id(&self) -> u64 {
        self.boot_id.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> PlatformResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PlatformError::Destroyed(self.id.clone()));
        }
        Ok(())
    }

    async fn ensure_session(&self, session: &mut Option<Session>) -> PlatformResult<()> {
        let boot_id = self.boot_id();
        if session.as_ref().map(|s| s.boot_id) == Some(boot_id) {
            return Ok(());
        }

        if tokio::fs::metadata(&self.dir).await.is_err() {
            return Err(PlatformError::Connection(format!(
                "{}: state directory {} is gone",
                self.id,
                self.dir.display()
            )));
        }

        debug!("Opened session to {} (boot {})", self.id, boot_id);
        *session = Some(Session { boot_id });
        Ok(())
    }

    async fn spawn(&self, command: &str) -> PlatformResult<ExecOutput> {
        let mut process = tokio::process::Command::new(&self.settings.shell);
        process
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .env("HOME", &self.dir)
            .env("SORTIE_MACHINE_ID", &self.id)
            .env("SORTIE_BOOT_ID", self.boot_id().to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &self.settings.env {
            process.env(key, value);
        }

        let output = process.output().await.map_err(|e| PlatformError::Execution {
            machine: self.id.clone(),
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn probe(&self) -> PlatformResult<()> {
        let output = self.spawn("true").await?;
        if output.success() {
            Ok(())
        } else {
            Err(PlatformError::Connection(format!(
                "{}: probe exited with {}",
                self.id, output.status
            )))
        }
    }

    async fn append_console(&self, line: &str) -> PlatformResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(CONSOLE_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Machine for LocalMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn execute(&self, command: &str) -> PlatformResult<ExecOutput> {
        let mut session = self.session.lock().await;
        self.check_live()?;
        self.ensure_session(&mut session).await?;
        debug!("{}: {}", self.id, command);
        self.spawn(command).await
    }

    async fn reboot(&self) -> PlatformResult<()> {
        let mut session = self.session.lock().await;
        self.check_live()?;

        *session = None;
        let boot_id = self.boot_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.append_console(&format!("reboot: boot {}\n", boot_id))
            .await?;

        let timeout = self.settings.reboot_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.probe().await {
                Ok(()) => break,
                Err(e) if Instant::now() >= deadline => {
                    debug!("{} still unreachable: {}", self.id, e);
                    return Err(PlatformError::RebootTimeout {
                        machine: self.id.clone(),
                        timeout,
                    });
                }
                Err(e) => debug!("Waiting for {} to come back: {}", self.id, e),
            }
            tokio::time::sleep(REBOOT_POLL_INTERVAL).await;
        }

        *session = Some(Session { boot_id });
        info!("{} rebooted (boot {})", self.id, boot_id);
        Ok(())
    }

    async fn console(&self) -> PlatformResult<String> {
        match tokio::fs::read_to_string(self.dir.join(CONSOLE_FILE)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn destroy(&self) -> PlatformResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = remove_dir(&self.dir).await {
            self.destroyed.store(false, Ordering::SeqCst);
            return Err(e);
        }
        debug!("Destroyed {}", self.id);
        Ok(())
    }
}

async fn remove_dir(dir: &Path) -> PlatformResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
