//! Batch concurrency scheduler
//!
//! Splits a role's hosts into ordered batches and runs them one batch at a
//! time. Hosts inside a batch run concurrently; the next batch launches
//! only once every host of the current one is terminal.
//!
//! - `edge`: one batch, all hosts at once
//! - `worker`: batches of `B` with a cooldown in between
//! - `master`: one host at a time, inventory order
//!
//! A batch with a failed host stops the role unless partial-failure
//! continuation is enabled. An abort stops further launches; in-flight
//! hosts always finish.

use crate::abort::AbortSignal;
use crate::node::HostUpgrader;
use crate::outcome::OutcomeTable;
use crate::plan::ConcurrencyPolicy;
use indexmap::IndexMap;
use rollout_core::{Host, HostErrorKind, HostFailure, HostUpgradeState, Role};
use std::sync::Arc;
use std::time::Duration;

/// Ordered batches for `hosts` under `policy`; empty input gives no batches
#[must_use]
pub fn partition(hosts: &[Host], policy: ConcurrencyPolicy) -> Vec<Vec<Host>> {
    if hosts.is_empty() {
        return Vec::new();
    }
    hosts
        .chunks(policy.batch_size(hosts.len()))
        .map(<[Host]>::to_vec)
        .collect()
}

/// Worker batch size derived from fleet size, bounded to `[2, 10]`
#[must_use]
pub fn auto_batch_size(worker_count: usize, redundancy_factor: usize) -> usize {
    (worker_count / redundancy_factor.max(1)).clamp(2, 10)
}

/// Result of running one role
#[derive(Debug, Clone, Default)]
pub struct RoleRun {
    /// Terminal state of every launched host, launch order
    pub outcomes: IndexMap<String, HostUpgradeState>,
    pub batches_total: usize,
    pub batches_launched: usize,
    /// Stopped launching because of an operator abort
    pub aborted: bool,
}

impl RoleRun {
    #[must_use]
    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, state)| **state == HostUpgradeState::Failed)
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Every batch launched and every host succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.aborted
            && self.batches_launched == self.batches_total
            && self
                .outcomes
                .values()
                .all(|s| *s == HostUpgradeState::Succeeded)
    }
}

pub struct BatchScheduler {
    upgrader: Arc<dyn HostUpgrader>,
    cooldown: Duration,
    continue_on_failure: bool,
    abort: AbortSignal,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(upgrader: Arc<dyn HostUpgrader>, cooldown: Duration, abort: AbortSignal) -> Self {
        Self {
            upgrader,
            cooldown,
            continue_on_failure: false,
            abort,
        }
    }

    #[must_use]
    pub fn with_continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    pub async fn run_role(
        &self,
        role: Role,
        hosts: &[Host],
        policy: ConcurrencyPolicy,
        target_version: &str,
        outcomes: &OutcomeTable,
    ) -> RoleRun {
        let batches = partition(hosts, policy);
        let mut run = RoleRun {
            batches_total: batches.len(),
            ..RoleRun::default()
        };
        tracing::info!(
            %role,
            hosts = hosts.len(),
            batches = batches.len(),
            %policy,
            "scheduling role"
        );

        for (index, batch) in batches.iter().enumerate() {
            let number = index + 1;
            if index > 0 && matches!(policy, ConcurrencyPolicy::Batched { .. }) {
                self.cool_down(role, number).await;
            }
            if self.abort.is_aborted() {
                tracing::warn!(%role, batch = number, "abort requested, not launching batch");
                run.aborted = true;
                break;
            }

            tracing::info!(
                %role,
                batch = number,
                of = run.batches_total,
                hosts = %batch.iter().map(|h| h.hostname.as_str()).collect::<Vec<_>>().join(","),
                "launching batch"
            );
            run.batches_launched += 1;

            let results = futures::future::join_all(batch.iter().map(|host| async move {
                let state = self.upgrader.upgrade(host, target_version, outcomes).await;
                (host, state)
            }))
            .await;

            let mut failed = 0usize;
            for (host, state) in results {
                let state = settle(host, state, outcomes);
                if state == HostUpgradeState::Failed {
                    failed += 1;
                }
                run.outcomes.insert(host.hostname.clone(), state);
            }
            tracing::info!(%role, batch = number, failed, "batch finished");

            if failed > 0 && !self.continue_on_failure {
                tracing::error!(%role, batch = number, failed, "halting role after failed batch");
                break;
            }
        }
        run
    }

    async fn cool_down(&self, role: Role, next_batch: usize) {
        if self.cooldown.is_zero() {
            return;
        }
        tracing::info!(
            %role,
            batch = next_batch,
            cooldown_secs = self.cooldown.as_secs(),
            "cooling down before next batch"
        );
        tokio::select! {
            () = tokio::time::sleep(self.cooldown) => {}
            () = self.abort.aborted() => {}
        }
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("cooldown", &self.cooldown)
            .field("continue_on_failure", &self.continue_on_failure)
            .finish_non_exhaustive()
    }
}

/// Write the terminal state back; a non-terminal return counts as a failure
fn settle(host: &Host, state: HostUpgradeState, outcomes: &OutcomeTable) -> HostUpgradeState {
    if state.is_terminal() {
        outcomes.set_state(&host.hostname, state);
        return state;
    }
    tracing::error!(host = %host.hostname, %state, "upgrader returned a non-terminal state");
    outcomes.update(&host.hostname, |o| {
        o.failure.get_or_insert(HostFailure {
            kind: HostErrorKind::Upgrade,
            failed_in: state,
            message: format!("upgrade stopped in {state}"),
        });
    });
    outcomes.set_state(&host.hostname, HostUpgradeState::Failed);
    HostUpgradeState::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::abort_pair;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Takes a fixed time per host and fails the listed hosts
    #[derive(Default)]
    struct Timed {
        failing: HashSet<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        launched: Mutex<Vec<String>>,
    }

    impl Timed {
        fn failing(hosts: &[&str]) -> Self {
            Self {
                failing: hosts.iter().map(|h| (*h).to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl HostUpgrader for Timed {
        async fn upgrade(
            &self,
            host: &Host,
            _target_version: &str,
            outcomes: &OutcomeTable,
        ) -> HostUpgradeState {
            self.launched.lock().push(host.hostname.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            outcomes.set_state(&host.hostname, HostUpgradeState::Upgrading);
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(&host.hostname) {
                HostUpgradeState::Failed
            } else {
                HostUpgradeState::Succeeded
            }
        }
    }

    fn workers(n: usize) -> Vec<Host> {
        (1..=n)
            .map(|i| Host::new(format!("worker-{i:02}"), format!("10.0.20.{i}"), Role::Worker))
            .collect()
    }

    #[test]
    fn partition_sizes() {
        let hosts = workers(12);
        let batches = partition(&hosts, ConcurrencyPolicy::Batched { size: 3 });
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.len() == 3));

        assert_eq!(partition(&hosts, ConcurrencyPolicy::Parallel).len(), 1);
        assert_eq!(partition(&hosts, ConcurrencyPolicy::Sequential).len(), 12);
        assert!(partition(&[], ConcurrencyPolicy::Parallel).is_empty());
    }

    #[test]
    fn auto_batch_size_is_bounded() {
        assert_eq!(auto_batch_size(3, 3), 2);
        assert_eq!(auto_batch_size(12, 3), 4);
        assert_eq!(auto_batch_size(300, 3), 10);
        assert_eq!(auto_batch_size(9, 0), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_run_strictly_in_sequence() {
        let hosts = workers(9);
        let upgrader = Arc::new(Timed::default());
        let scheduler =
            BatchScheduler::new(upgrader.clone(), Duration::from_secs(30), AbortSignal::never());
        let table = OutcomeTable::new(&hosts);
        let started = tokio::time::Instant::now();

        let run = scheduler
            .run_role(Role::Worker, &hosts, ConcurrencyPolicy::Batched { size: 3 }, "8.10", &table)
            .await;

        assert!(run.is_complete());
        assert_eq!(run.batches_launched, 3);
        assert_eq!(upgrader.peak.load(Ordering::SeqCst), 3);
        // three batches of 60s plus two cooldowns
        assert_eq!(started.elapsed(), Duration::from_secs(3 * 60 + 2 * 30));
        let names: Vec<_> = hosts.iter().map(|h| h.hostname.clone()).collect();
        assert_eq!(run.outcomes.keys().cloned().collect::<Vec<_>>(), names);
        assert_eq!(table.hosts_in(HostUpgradeState::Succeeded).len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_never_overlaps() {
        let hosts: Vec<_> = (1..=3)
            .map(|i| Host::new(format!("master-{i:02}"), "x", Role::Master))
            .collect();
        let upgrader = Arc::new(Timed::default());
        let scheduler =
            BatchScheduler::new(upgrader.clone(), Duration::from_secs(30), AbortSignal::never());
        let table = OutcomeTable::new(&hosts);
        let started = tokio::time::Instant::now();
        scheduler
            .run_role(Role::Master, &hosts, ConcurrencyPolicy::Sequential, "8.10", &table)
            .await;
        assert_eq!(upgrader.peak.load(Ordering::SeqCst), 1);
        assert_eq!(
            *upgrader.launched.lock(),
            vec!["master-01", "master-02", "master-03"]
        );
        // no cooldown outside worker batches
        assert_eq!(started.elapsed(), Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_stops_the_role() {
        let hosts = workers(9);
        let upgrader = Arc::new(Timed::failing(&["worker-05"]));
        let scheduler = BatchScheduler::new(upgrader.clone(), Duration::ZERO, AbortSignal::never());
        let table = OutcomeTable::new(&hosts);

        let run = scheduler
            .run_role(Role::Worker, &hosts, ConcurrencyPolicy::Batched { size: 3 }, "8.10", &table)
            .await;

        assert_eq!(run.batches_launched, 2);
        assert_eq!(run.failed(), vec!["worker-05"]);
        // siblings in the failing batch still finish
        assert_eq!(table.state("worker-06"), Some(HostUpgradeState::Succeeded));
        assert_eq!(table.state("worker-07"), Some(HostUpgradeState::Pending));
        assert_eq!(upgrader.launched.lock().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_policy_launches_remaining_batches() {
        let hosts = workers(6);
        let upgrader = Arc::new(Timed::failing(&["worker-01"]));
        let scheduler = BatchScheduler::new(upgrader, Duration::ZERO, AbortSignal::never())
            .with_continue_on_failure(true);
        let table = OutcomeTable::new(&hosts);
        let run = scheduler
            .run_role(Role::Worker, &hosts, ConcurrencyPolicy::Batched { size: 2 }, "8.10", &table)
            .await;
        assert_eq!(run.batches_launched, 3);
        assert_eq!(run.failed(), vec!["worker-01"]);
        assert!(!run.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_during_cooldown_stops_launching() {
        let hosts = workers(6);
        let (handle, signal) = abort_pair();
        let upgrader = Arc::new(Timed::default());
        let scheduler = BatchScheduler::new(upgrader.clone(), Duration::from_secs(300), signal);
        let table = OutcomeTable::new(&hosts);

        let abort_later = async {
            tokio::time::sleep(Duration::from_secs(90)).await;
            handle.abort();
        };
        let (run, ()) = tokio::join!(
            scheduler.run_role(Role::Worker, &hosts, ConcurrencyPolicy::Batched { size: 3 }, "8.10", &table),
            abort_later
        );

        assert!(run.aborted);
        assert_eq!(run.batches_launched, 1);
        assert_eq!(upgrader.launched.lock().len(), 3);
        assert_eq!(table.hosts_in(HostUpgradeState::Pending).len(), 3);
    }

    #[tokio::test]
    async fn non_terminal_return_is_settled_as_failure() {
        struct Stuck;

        #[async_trait::async_trait]
        impl HostUpgrader for Stuck {
            async fn upgrade(&self, _: &Host, _: &str, _: &OutcomeTable) -> HostUpgradeState {
                HostUpgradeState::Rebooting
            }
        }

        let hosts = workers(1);
        let table = OutcomeTable::new(&hosts);
        let run = BatchScheduler::new(Arc::new(Stuck), Duration::ZERO, AbortSignal::never())
            .run_role(Role::Worker, &hosts, ConcurrencyPolicy::Parallel, "8.10", &table)
            .await;
        assert_eq!(run.failed(), vec!["worker-01"]);
        let failure = table.get("worker-01").unwrap().failure.unwrap();
        assert_eq!(failure.failed_in, HostUpgradeState::Rebooting);
    }
}
