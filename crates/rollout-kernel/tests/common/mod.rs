#![allow(dead_code)]

use parking_lot::Mutex;
use rollout_core::{Host, HostUpgradeState, Role, RolloutConfig};
use rollout_kernel::{AuditLog, HostUpgrader, NodeUpgrader, Orchestrator, OutcomeTable};
use rollout_test_utils::{host_records, FakeControlPlane, FakeRemote, TARGET_VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const SERVICES: [&str; 4] = ["impala", "hive", "yarn", "hdfs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Launched(String),
    Finished(String, HostUpgradeState),
}

/// Wraps an upgrader and records launches, completions and concurrency
pub struct Recording {
    inner: Arc<dyn HostUpgrader>,
    events: Mutex<Vec<Event>>,
    in_flight: Mutex<HashMap<Role, usize>>,
    peak: Mutex<HashMap<Role, usize>>,
}

impl Recording {
    pub fn wrap(inner: Arc<dyn HostUpgrader>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            events: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            peak: Mutex::new(HashMap::new()),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Launched(h) => Some(h),
                Event::Finished(..) => None,
            })
            .collect()
    }

    pub fn peak(&self, role: Role) -> usize {
        self.peak.lock().get(&role).copied().unwrap_or(0)
    }

    fn position(&self, wanted: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == wanted)
    }

    pub fn launch_index(&self, host: &str) -> Option<usize> {
        self.position(&Event::Launched(host.to_string()))
    }

    pub fn finish_index(&self, host: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Event::Finished(h, _) if h == host))
    }
}

#[async_trait::async_trait]
impl HostUpgrader for Recording {
    async fn upgrade(
        &self,
        host: &Host,
        target_version: &str,
        outcomes: &OutcomeTable,
    ) -> HostUpgradeState {
        self.events.lock().push(Event::Launched(host.hostname.clone()));
        {
            let mut in_flight = self.in_flight.lock();
            let now = in_flight.entry(host.role).or_default();
            *now += 1;
            let mut peak = self.peak.lock();
            let top = peak.entry(host.role).or_default();
            *top = (*top).max(*now);
        }

        let state = self.inner.upgrade(host, target_version, outcomes).await;

        *self.in_flight.lock().entry(host.role).or_default() -= 1;
        self.events
            .lock()
            .push(Event::Finished(host.hostname.clone(), state));
        state
    }
}

pub struct Harness {
    pub control_plane: Arc<FakeControlPlane>,
    pub remote: Arc<FakeRemote>,
    pub recording: Arc<Recording>,
}

impl Harness {
    /// Fleet discovered from the control plane, every host on 7.9
    pub fn new(edges: usize, workers: usize, masters: usize) -> Self {
        let control_plane =
            Arc::new(FakeControlPlane::new(SERVICES).with_hosts(host_records(edges, workers, masters)));
        let remote = Arc::new(FakeRemote::new("7.9", TARGET_VERSION));
        let node = NodeUpgrader::new(
            remote.clone(),
            &RolloutConfig::new(),
            Uuid::nil(),
            Arc::new(AuditLog::new()),
        );
        Self {
            control_plane,
            remote,
            recording: Recording::wrap(Arc::new(node)),
        }
    }

    pub fn orchestrator(&self, config: RolloutConfig) -> Orchestrator {
        Orchestrator::new(config, self.control_plane.clone(), self.remote.clone())
            .with_upgrader(self.recording.clone())
    }
}

pub fn hostnames(prefix: &str, range: std::ops::RangeInclusive<usize>) -> Vec<String> {
    range.map(|i| format!("{prefix}-{i:02}")).collect()
}
