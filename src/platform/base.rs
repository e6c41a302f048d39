//! Bookkeeping shared by every backend.
//!
//! [`FlightBase`] tracks the clusters a flight has created and
//! [`ClusterBase`] tracks the machines a cluster holds. Backends embed
//! one of each and delegate to them, so the destroy semantics (idempotent,
//! transitive, safe under concurrent provisioning) are written once.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, warn};

use super::{Cluster, Machine, PlatformError, PlatformResult};

struct FlightState {
    clusters: Vec<Arc<dyn Cluster>>,
    destroyed: bool,
}

/// Registry of the clusters owned by one flight.
///
/// Always held in an `Arc`: clusters keep a weak back-reference so they
/// can detach themselves when destroyed.
pub struct FlightBase {
    platform: String,
    state: Mutex<FlightState>,
}

impl FlightBase {
    /// Creates an empty registry for the given platform.
    pub fn new(platform: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.into(),
            state: Mutex::new(FlightState {
                clusters: Vec::new(),
                destroyed: false,
            }),
        })
    }

    /// Platform identifier.
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Fails with `Destroyed` once the flight has been torn down.
    pub fn check_live(&self) -> PlatformResult<()> {
        match self.state.lock() {
            Ok(state) if !state.destroyed => Ok(()),
            _ => Err(PlatformError::Destroyed(format!("{} flight", self.platform))),
        }
    }

    /// Registers a newly created cluster.
    ///
    /// Fails if the flight was destroyed while the cluster was being
    /// created; the caller then owns the orphan and must destroy it.
    pub fn add_cluster(&self, cluster: Arc<dyn Cluster>) -> PlatformResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PlatformError::Provision("flight state poisoned".to_string()))?;
        if state.destroyed {
            return Err(PlatformError::Destroyed(format!("{} flight", self.platform)));
        }
        state.clusters.push(cluster);
        Ok(())
    }

    /// Forgets a cluster. Called by the cluster itself on destroy.
    pub fn remove_cluster(&self, id: &str) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clusters
            .retain(|c| c.id() != id);
    }

    /// Number of registered clusters.
    pub fn cluster_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clusters
            .len()
    }

    /// Destroys every registered cluster and refuses new ones.
    ///
    /// All clusters are attempted even if some fail; the first error is
    /// returned and the failed clusters stay registered for a retry.
    pub async fn destroy(&self) -> PlatformResult<()> {
        let clusters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.destroyed = true;
            std::mem::take(&mut state.clusters)
        };

        debug!(
            "Destroying {} flight with {} live clusters",
            self.platform,
            clusters.len()
        );

        let mut first_err = None;
        let mut failed = Vec::new();
        for cluster in clusters {
            if let Err(e) = cluster.destroy().await {
                warn!("Failed to destroy cluster {}: {}", cluster.id(), e);
                first_err.get_or_insert(e);
                failed.push(cluster);
            }
        }

        match first_err {
            Some(e) => {
                self.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clusters
                    .extend(failed);
                Err(e)
            }
            None => Ok(()),
        }
    }
}

struct ClusterState {
    machines: Vec<Arc<dyn Machine>>,
    destroyed: bool,
}

/// Ordered machine list of one cluster.
pub struct ClusterBase {
    id: String,
    flight: Weak<FlightBase>,
    state: Mutex<ClusterState>,
}

impl ClusterBase {
    /// Creates an empty machine list bound to `flight`.
    pub fn new(id: impl Into<String>, flight: &Arc<FlightBase>) -> Self {
        Self {
            id: id.into(),
            flight: Arc::downgrade(flight),
            state: Mutex::new(ClusterState {
                machines: Vec::new(),
                destroyed: false,
            }),
        }
    }

    /// Cluster identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fails with `Destroyed` once the cluster or its flight is gone.
    pub fn check_live(&self) -> PlatformResult<()> {
        let destroyed = self.state.lock().map(|s| s.destroyed).unwrap_or(true);
        if destroyed || self.flight.upgrade().is_none() {
            return Err(PlatformError::Destroyed(format!("cluster {}", self.id)));
        }
        Ok(())
    }

    /// Adds a provisioned machine.
    ///
    /// Fails if the cluster was destroyed meanwhile; the caller must then
    /// destroy the machine itself.
    pub fn add_machine(&self, machine: Arc<dyn Machine>) -> PlatformResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PlatformError::Provision("cluster state poisoned".to_string()))?;
        if state.destroyed {
            return Err(PlatformError::Destroyed(format!("cluster {}", self.id)));
        }
        state.machines.push(machine);
        Ok(())
    }

    /// Machines in provisioning order.
    pub fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .machines
            .clone()
    }

    /// Takes a machine out of the list and destroys it.
    ///
    /// Returns `Ok(false)` if no machine with that id is held. A machine
    /// whose destroy fails is put back in its place.
    pub async fn remove_machine(&self, id: &str) -> PlatformResult<bool> {
        let taken = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .machines
                .iter()
                .position(|m| m.id() == id)
                .map(|idx| (idx, state.machines.remove(idx)))
        };
        let Some((idx, machine)) = taken else {
            return Ok(false);
        };

        if let Err(e) = machine.destroy().await {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let idx = idx.min(state.machines.len());
            state.machines.insert(idx, machine);
            return Err(e);
        }

        debug!("Removed {} from cluster {}", id, self.id);
        Ok(true)
    }

    /// Destroys all machines and detaches from the flight.
    ///
    /// Returns `Ok(true)` when this call finished the teardown and
    /// `Ok(false)` when the cluster was already destroyed. Machines that
    /// fail to destroy stay listed and the cluster stays attached to its
    /// flight, so a later call retries them.
    pub async fn destroy(&self) -> PlatformResult<bool> {
        let machines = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.destroyed && state.machines.is_empty() {
                return Ok(false);
            }
            state.destroyed = true;
            std::mem::take(&mut state.machines)
        };

        let mut first_err = None;
        let mut failed = Vec::new();
        for machine in machines {
            if let Err(e) = machine.destroy().await {
                warn!("Failed to destroy machine {}: {}", machine.id(), e);
                first_err.get_or_insert(e);
                failed.push(machine);
            }
        }

        if let Some(e) = first_err {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .machines
                .extend(failed);
            return Err(e);
        }

        if let Some(flight) = self.flight.upgrade() {
            flight.remove_cluster(&self.id);
        }
        Ok(true)
    }
}
