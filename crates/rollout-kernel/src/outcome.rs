//! Live per-host outcome table
//!
//! Concurrent host tasks each write only their own key, so a `DashMap`
//! is enough. Inventory order is kept separately for snapshots.

use chrono::Utc;
use dashmap::DashMap;
use indexmap::IndexMap;
use rollout_core::{Host, HostOutcome, HostUpgradeState};

#[derive(Debug, Default)]
pub struct OutcomeTable {
    entries: DashMap<String, HostOutcome>,
    order: Vec<String>,
}

impl OutcomeTable {
    /// Every host starts `Pending`
    #[must_use]
    pub fn new(hosts: &[Host]) -> Self {
        let entries = DashMap::with_capacity(hosts.len());
        for host in hosts {
            entries.insert(host.hostname.clone(), HostOutcome::pending(host.role));
        }
        Self {
            entries,
            order: hosts.iter().map(|h| h.hostname.clone()).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, hostname: &str) -> Option<HostOutcome> {
        self.entries.get(hostname).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn state(&self, hostname: &str) -> Option<HostUpgradeState> {
        self.entries.get(hostname).map(|e| e.state)
    }

    /// Mutate one host's entry; unknown hosts are ignored
    pub fn update(&self, hostname: &str, f: impl FnOnce(&mut HostOutcome)) {
        if let Some(mut entry) = self.entries.get_mut(hostname) {
            f(entry.value_mut());
        }
    }

    /// Record a state, stamping start and finish times
    pub fn set_state(&self, hostname: &str, state: HostUpgradeState) {
        self.update(hostname, |o| {
            if o.started_at.is_none() && state.is_touched() {
                o.started_at = Some(Utc::now());
            }
            if state.is_terminal() && o.finished_at.is_none() {
                o.finished_at = Some(Utc::now());
            }
            o.state = state;
        });
    }

    /// Hosts currently in a state, inventory order
    #[must_use]
    pub fn hosts_in(&self, state: HostUpgradeState) -> Vec<String> {
        self.order
            .iter()
            .filter(|h| self.state(h) == Some(state))
            .cloned()
            .collect()
    }

    /// Ordered copy for the session
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<String, HostOutcome> {
        self.order
            .iter()
            .filter_map(|h| self.get(h).map(|o| (h.clone(), o)))
            .collect()
    }
}
