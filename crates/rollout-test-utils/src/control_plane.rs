//! Scriptable control plane

use parking_lot::Mutex;
use rollout_core::{
    ControlPlane, ControlPlaneError, FleetHealth, HostRecord, LifecycleDirection, ServiceState,
};
use std::collections::{HashMap, HashSet};

/// One stop/start command received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub service: String,
    pub direction: LifecycleDirection,
}

#[derive(Debug)]
struct Inner {
    hosts: Vec<HostRecord>,
    services: Vec<String>,
    states: HashMap<String, ServiceState>,
    stuck: HashSet<(String, bool)>,
    rejected: HashSet<String>,
    calls: Vec<ServiceCall>,
    health: FleetHealth,
    unreachable: bool,
    health_polls: usize,
}

/// Control plane whose services start out `Started` and transition
/// instantly unless told to hang
#[derive(Debug)]
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

impl FakeControlPlane {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let services: Vec<String> = services.into_iter().map(Into::into).collect();
        let states = services
            .iter()
            .map(|s| (s.clone(), ServiceState::Started))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                hosts: Vec::new(),
                services,
                states,
                stuck: HashSet::new(),
                rejected: HashSet::new(),
                calls: Vec::new(),
                health: FleetHealth {
                    healthy: true,
                    details: "all services good".into(),
                },
                unreachable: false,
                health_polls: 0,
            }),
        }
    }

    /// Hosts returned by `list_hosts`
    #[must_use]
    pub fn with_hosts(self, hosts: Vec<HostRecord>) -> Self {
        self.inner.lock().hosts = hosts;
        self
    }

    /// The service accepts the command but never reaches the target state
    pub fn hang_on(&self, service: &str, direction: LifecycleDirection) {
        self.inner
            .lock()
            .stuck
            .insert((service.to_string(), direction == LifecycleDirection::Stop));
    }

    /// Commands for this service fail with a server error
    pub fn reject(&self, service: &str) {
        self.inner.lock().rejected.insert(service.to_string());
    }

    /// Every call fails as if the network were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    pub fn set_health(&self, healthy: bool, details: &str) {
        self.inner.lock().health = FleetHealth {
            healthy,
            details: details.to_string(),
        };
    }

    /// Commands received, in order
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.inner.lock().calls.clone()
    }

    fn calls_in(&self, direction: LifecycleDirection) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.direction == direction)
            .map(|c| c.service.clone())
            .collect()
    }

    #[must_use]
    pub fn stop_calls(&self) -> Vec<String> {
        self.calls_in(LifecycleDirection::Stop)
    }

    #[must_use]
    pub fn start_calls(&self) -> Vec<String> {
        self.calls_in(LifecycleDirection::Start)
    }

    #[must_use]
    pub fn state_of(&self, service: &str) -> Option<ServiceState> {
        self.inner.lock().states.get(service).copied()
    }

    #[must_use]
    pub fn health_polls(&self) -> usize {
        self.inner.lock().health_polls
    }

    fn check_reachable(inner: &Inner) -> Result<(), ControlPlaneError> {
        if inner.unreachable {
            Err(ControlPlaneError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn command(&self, service: &str, direction: LifecycleDirection) -> Result<(), ControlPlaneError> {
        let mut inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        if !inner.states.contains_key(service) {
            return Err(ControlPlaneError::NotFound(service.to_string()));
        }
        inner.calls.push(ServiceCall {
            service: service.to_string(),
            direction,
        });
        if inner.rejected.contains(service) {
            return Err(ControlPlaneError::Server {
                status: 400,
                message: format!("command rejected for {service}"),
            });
        }
        let stop = direction == LifecycleDirection::Stop;
        let hung = inner.stuck.contains(&(service.to_string(), stop));
        let next = match (stop, hung) {
            (true, false) => ServiceState::Stopped,
            (true, true) => ServiceState::Stopping,
            (false, false) => ServiceState::Started,
            (false, true) => ServiceState::Starting,
        };
        inner.states.insert(service.to_string(), next);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, ControlPlaneError> {
        let inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        Ok(inner.hosts.clone())
    }

    async fn list_cluster_services(&self) -> Result<Vec<String>, ControlPlaneError> {
        let inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        Ok(inner.services.clone())
    }

    async fn stop_service(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.command(name, LifecycleDirection::Stop)
    }

    async fn start_service(&self, name: &str) -> Result<(), ControlPlaneError> {
        self.command(name, LifecycleDirection::Start)
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState, ControlPlaneError> {
        let inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        inner
            .states
            .get(name)
            .copied()
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))
    }

    async fn fleet_health(&self) -> Result<FleetHealth, ControlPlaneError> {
        let mut inner = self.inner.lock();
        Self::check_reachable(&inner)?;
        inner.health_polls += 1;
        Ok(inner.health.clone())
    }
}
