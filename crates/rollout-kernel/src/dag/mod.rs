use parking_lot::RwLock;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use rollout_core::{PhaseName, PlanError};

/// Phase dependency graph; an edge `a -> b` means `b` depends on `a`
#[derive(Debug, Default)]
pub struct PhaseDag {
    inner: RwLock<DiGraphMap<PhaseName, ()>>,
}

impl PhaseDag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_phase(&self, phase: PhaseName) {
        self.inner.write().add_node(phase);
    }

    /// Record that `dependent` may only start after `dependency`
    ///
    /// Edges that would close a cycle are rejected and leave the graph
    /// unchanged.
    pub fn add_dependency(&self, dependency: PhaseName, dependent: PhaseName) -> Result<(), PlanError> {
        if dependency == dependent {
            return Err(PlanError::SelfDependency(dependent));
        }

        let mut g = self.inner.write();
        g.add_node(dependency);
        g.add_node(dependent);
        g.add_edge(dependency, dependent, ());

        if petgraph::algo::is_cyclic_directed(&*g) {
            g.remove_edge(dependency, dependent);
            return Err(PlanError::CycleDetected);
        }

        Ok(())
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count()
    }

    #[must_use]
    pub fn contains(&self, phase: PhaseName) -> bool {
        self.inner.read().contains_node(phase)
    }

    /// Execution order (dependencies first)
    pub fn topological_order(&self) -> Result<Vec<PhaseName>, PlanError> {
        let g = self.inner.read();
        toposort(&*g, None).map_err(|_| PlanError::CycleDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_sorts_in_order() {
        let dag = PhaseDag::new();
        for pair in PhaseName::ALL.windows(2) {
            dag.add_dependency(pair[0], pair[1]).unwrap();
        }
        assert_eq!(dag.topological_order().unwrap(), PhaseName::ALL.to_vec());
    }

    #[test]
    fn cycle_is_rejected_and_rolled_back() {
        let dag = PhaseDag::new();
        dag.add_dependency(PhaseName::ServiceStop, PhaseName::EdgeUpgrade).unwrap();
        dag.add_dependency(PhaseName::EdgeUpgrade, PhaseName::WorkerUpgrade).unwrap();
        assert_eq!(
            dag.add_dependency(PhaseName::WorkerUpgrade, PhaseName::ServiceStop),
            Err(PlanError::CycleDetected)
        );
        assert_eq!(dag.edge_count(), 2);
        assert!(dag.topological_order().is_ok());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let dag = PhaseDag::new();
        assert_eq!(
            dag.add_dependency(PhaseName::MasterUpgrade, PhaseName::MasterUpgrade),
            Err(PlanError::SelfDependency(PhaseName::MasterUpgrade))
        );
    }
}
