//! Upgrade plan: phases, their dependencies, host subsets and concurrency
//!
//! A plan is checked once at construction (no duplicates, no unknown or
//! self dependencies, no cycles) and afterwards only hands out its
//! execution order.

use crate::dag::PhaseDag;
use rollout_core::{Host, PhaseName, PlanError, Role};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Which hosts a phase operates on
#[derive(Clone)]
pub enum HostSelector {
    /// Every host in the inventory
    All,
    /// Hosts with this role
    Role(Role),
    /// Arbitrary predicate
    Custom(Arc<dyn Fn(&Host) -> bool + Send + Sync>),
}

impl HostSelector {
    #[must_use]
    pub fn matches(&self, host: &Host) -> bool {
        match self {
            HostSelector::All => true,
            HostSelector::Role(role) => host.role == *role,
            HostSelector::Custom(predicate) => predicate(host),
        }
    }

    /// Hosts selected, in inventory order
    #[must_use]
    pub fn select(&self, hosts: &[Host]) -> Vec<Host> {
        hosts.iter().filter(|h| self.matches(h)).cloned().collect()
    }
}

impl fmt::Debug for HostSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSelector::All => f.write_str("All"),
            HostSelector::Role(role) => write!(f, "Role({role})"),
            HostSelector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How many hosts of a phase run at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// All selected hosts in one batch
    Parallel,
    /// Sequential batches of at most `size` hosts
    Batched { size: usize },
    /// One host at a time, in inventory order
    Sequential,
}

impl ConcurrencyPolicy {
    /// Batch size for `host_count` hosts (at least 1)
    #[must_use]
    pub fn batch_size(&self, host_count: usize) -> usize {
        match self {
            ConcurrencyPolicy::Parallel => host_count.max(1),
            ConcurrencyPolicy::Batched { size } => (*size).max(1),
            ConcurrencyPolicy::Sequential => 1,
        }
    }

    /// Standard policy for a role
    #[must_use]
    pub fn for_role(role: Role, worker_batch_size: usize) -> Self {
        match role {
            Role::Edge => ConcurrencyPolicy::Parallel,
            Role::Worker => ConcurrencyPolicy::Batched {
                size: worker_batch_size,
            },
            Role::Master => ConcurrencyPolicy::Sequential,
        }
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyPolicy::Parallel => f.write_str("parallel"),
            ConcurrencyPolicy::Batched { size } => write!(f, "batches of {size}"),
            ConcurrencyPolicy::Sequential => f.write_str("one at a time"),
        }
    }
}

/// One pipeline stage
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: PhaseName,
    pub depends_on: BTreeSet<PhaseName>,
    pub hosts: HostSelector,
    pub policy: ConcurrencyPolicy,
}

impl Phase {
    #[must_use]
    pub fn new(name: PhaseName, hosts: HostSelector) -> Self {
        Self {
            name,
            depends_on: BTreeSet::new(),
            hosts,
            policy: ConcurrencyPolicy::Parallel,
        }
    }

    #[must_use]
    pub fn after(mut self, dependency: PhaseName) -> Self {
        self.depends_on.insert(dependency);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Validated set of phases
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    phases: Vec<Phase>,
    order: Vec<PhaseName>,
}

impl UpgradePlan {
    /// Build and validate a plan
    pub fn new(phases: Vec<Phase>) -> Result<Self, PlanError> {
        let dag = PhaseDag::new();
        for phase in &phases {
            if dag.contains(phase.name) {
                return Err(PlanError::DuplicatePhase(phase.name));
            }
            dag.add_phase(phase.name);
        }
        for phase in &phases {
            for dependency in &phase.depends_on {
                if *dependency == phase.name {
                    return Err(PlanError::SelfDependency(phase.name));
                }
                if !dag.contains(*dependency) {
                    return Err(PlanError::UnknownDependency {
                        phase: phase.name,
                        missing: *dependency,
                    });
                }
                dag.add_dependency(*dependency, phase.name)?;
            }
        }
        let order = dag.topological_order()?;
        Ok(Self { phases, order })
    }

    /// The fixed eight-phase pipeline, each phase depending on its predecessor
    #[must_use]
    pub fn standard(worker_batch_size: usize) -> Self {
        let selector = |name: PhaseName| match name.upgrade_role() {
            Some(role) => HostSelector::Role(role),
            None => HostSelector::All,
        };
        let mut phases = Vec::with_capacity(PhaseName::ALL.len());
        let mut previous: Option<PhaseName> = None;
        for name in PhaseName::ALL {
            let mut phase = Phase::new(name, selector(name));
            if let Some(role) = name.upgrade_role() {
                phase = phase.with_policy(ConcurrencyPolicy::for_role(role, worker_batch_size));
            }
            if let Some(prev) = previous {
                phase = phase.after(prev);
            }
            phases.push(phase);
            previous = Some(name);
        }
        let order = PhaseName::ALL.to_vec();
        Self { phases, order }
    }

    /// Phases in execution order
    pub fn execution_order(&self) -> impl Iterator<Item = &Phase> {
        self.order.iter().filter_map(|name| self.phase(*name))
    }

    #[must_use]
    pub fn phase(&self, name: PhaseName) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}
