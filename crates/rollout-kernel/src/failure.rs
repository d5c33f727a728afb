//! Failure handling
//!
//! Once a phase fails nothing else runs. The handler sorts hosts into
//! upgraded, failed and never-attempted, works out which services this run
//! left stopped and, when service rollback is enabled, starts those again
//! in reverse stop order. Upgraded hosts are never reverted.

use crate::services::{outstanding, ServiceController};
use rollout_core::{
    HaltKind, HostErrorKind, HostUpgradeState, PhaseName, PhaseStatus, Role, RolloutError,
    ServiceTopology, UpgradeSession,
};
use serde::{Deserialize, Serialize};

/// A host that reached `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedHost {
    pub hostname: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<HostErrorKind>,
    /// State the host was in when it failed
    pub failed_in: HostUpgradeState,
    pub message: String,
}

/// Structured account of a halted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub halt: HaltKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_in: Option<PhaseName>,
    /// Hosts already upgraded; these stay upgraded
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedHost>,
    /// Hosts no upgrade work touched
    pub never_attempted: Vec<String>,
    pub phases_not_run: Vec<PhaseName>,
    pub services_stopped: Vec<String>,
    pub services_restored: Vec<String>,
    pub services_left_stopped: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
    /// Re-running needs no manual work first
    #[serde(default)]
    pub safe_to_rerun: bool,
    /// Hosts or services need a human before anything else runs
    #[serde(default)]
    pub operator_required: bool,
    pub recommendation: String,
}

impl FailureReport {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.halt.exit_code()
    }
}

pub struct FailureHandler<'a> {
    controller: &'a ServiceController,
    rollback_enabled: bool,
}

impl<'a> FailureHandler<'a> {
    #[must_use]
    pub fn new(controller: &'a ServiceController, rollback_enabled: bool) -> Self {
        Self {
            controller,
            rollback_enabled,
        }
    }

    /// Build the report for `error`, restarting services first if enabled
    pub async fn handle(&self, error: &RolloutError, session: &UpgradeSession) -> FailureReport {
        let halt = error.kind();
        tracing::error!(
            %halt,
            phase = ?session.halted_in,
            error = %error,
            "run halted"
        );

        let stopped = session.service_stop_order.clone();
        let mut restarted = session.service_start_order.clone();
        let pending = outstanding(&stopped, &restarted);

        let mut services_restored = Vec::new();
        let mut rollback_error = None;
        if self.rollback_enabled && !pending.is_empty() {
            tracing::warn!(services = %pending.join(","), "restarting services stopped by this run");
            match self.controller.start(&ServiceTopology::new(pending.clone())).await {
                Ok(started) => services_restored = started,
                Err(e) => {
                    tracing::error!(error = %e, "service rollback incomplete");
                    services_restored = e.transitioned().to_vec();
                    rollback_error = Some(e.to_string());
                }
            }
            restarted.extend(services_restored.iter().cloned());
        }
        let services_left_stopped = outstanding(&stopped, &restarted);

        let failed = session
            .per_host_outcome
            .iter()
            .filter(|(_, o)| o.is_failed())
            .map(|(hostname, o)| FailedHost {
                hostname: hostname.clone(),
                role: o.role,
                kind: o.failure.as_ref().map(|f| f.kind),
                failed_in: o
                    .failure
                    .as_ref()
                    .map_or(HostUpgradeState::Failed, |f| f.failed_in),
                message: o
                    .failure
                    .as_ref()
                    .map_or_else(String::new, |f| f.message.clone()),
            })
            .collect();

        let mut report = FailureReport {
            halt,
            message: error.to_string(),
            halted_in: session.halted_in,
            succeeded: owned(session.succeeded_hosts()),
            failed,
            never_attempted: owned(session.never_attempted()),
            phases_not_run: session
                .phases
                .iter()
                .filter(|p| p.status == PhaseStatus::Pending)
                .map(|p| p.name)
                .collect(),
            services_stopped: stopped,
            services_restored,
            services_left_stopped,
            rollback_error,
            safe_to_rerun: error.is_retryable(),
            operator_required: error.requires_operator(),
            recommendation: String::new(),
        };
        report.recommendation = recommend(&report, session);
        report
    }
}

fn owned(hosts: Vec<&str>) -> Vec<String> {
    hosts.into_iter().map(str::to_string).collect()
}

fn recommend(report: &FailureReport, session: &UpgradeSession) -> String {
    let mut advice = match report.halt {
        HaltKind::Discovery | HaltKind::Config => {
            "Fix the inventory or configuration and re-run; nothing was changed.".to_string()
        }
        HaltKind::ValidationBlocker if report.succeeded.is_empty() => {
            "Resolve the blockers in the validation report and re-run; no host was touched."
                .to_string()
        }
        HaltKind::ValidationBlocker => {
            "Resolve the post-upgrade blockers before starting services again.".to_string()
        }
        HaltKind::HostUpgrade => format!(
            "Inspect the failed hosts; their backups are under {}. Upgraded hosts stay \
             upgraded. Re-run once fixed to continue with the remaining hosts.",
            session
                .backup_root
                .join(session.session_id.to_string())
                .display()
        ),
        HaltKind::RebootTimeout => {
            "Check the console of hosts that did not return; they may still be mid-upgrade. \
             Do not re-run against them until they are reachable."
                .to_string()
        }
        HaltKind::ServiceLifecycle | HaltKind::ServiceTimeout => {
            "Reconcile service state in the control plane before any further run.".to_string()
        }
        HaltKind::Aborted => {
            "Run aborted by operator; in-flight hosts finished. Re-run to continue.".to_string()
        }
    };
    if !report.services_left_stopped.is_empty() {
        let mut start_order = report.services_left_stopped.clone();
        start_order.reverse();
        advice.push_str(&format!(
            " Services still stopped, start in this order: {}.",
            start_order.join(", ")
        ));
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use rollout_core::{HostFailure, HostOutcome, PhaseRecord, SessionStatus};
    use rollout_test_utils::FakeControlPlane;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn session() -> UpgradeSession {
        let mut per_host_outcome = IndexMap::new();
        let mut done = HostOutcome::pending(Role::Edge);
        done.state = HostUpgradeState::Succeeded;
        per_host_outcome.insert("edge-01".to_string(), done);
        let mut failed = HostOutcome::pending(Role::Worker);
        failed.state = HostUpgradeState::Failed;
        failed.failure = Some(HostFailure {
            kind: HostErrorKind::Upgrade,
            failed_in: HostUpgradeState::Upgrading,
            message: "transaction check error".into(),
        });
        per_host_outcome.insert("worker-01".to_string(), failed);
        per_host_outcome.insert("master-01".to_string(), HostOutcome::pending(Role::Master));

        let mut phases: Vec<_> = PhaseName::ALL.iter().map(|p| PhaseRecord::pending(*p)).collect();
        for record in &mut phases[..3] {
            record.status = PhaseStatus::Succeeded;
        }
        phases[3].status = PhaseStatus::Failed;

        UpgradeSession {
            session_id: Uuid::nil(),
            target_version: "8.10".into(),
            started_at: Utc::now(),
            finished_at: None,
            backup_root: PathBuf::from("/var/backups/rollout"),
            status: SessionStatus::Halted,
            halted_in: Some(PhaseName::WorkerUpgrade),
            per_host_outcome,
            phases,
            service_stop_order: vec!["impala".into(), "hive".into(), "hdfs".into()],
            service_start_order: Vec::new(),
        }
    }

    fn error() -> RolloutError {
        RolloutError::HostUpgrade {
            phase: PhaseName::WorkerUpgrade,
            failed: vec!["worker-01".into()],
        }
    }

    fn controller(cp: Arc<FakeControlPlane>) -> ServiceController {
        ServiceController::new(cp, Duration::from_secs(60), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn report_separates_upgraded_failed_and_untouched() {
        let cp = Arc::new(FakeControlPlane::new(["impala", "hive", "hdfs"]));
        let ctl = controller(cp.clone());
        let report = FailureHandler::new(&ctl, false)
            .handle(&error(), &session())
            .await;

        assert_eq!(report.halt, HaltKind::HostUpgrade);
        assert_eq!(report.exit_code(), 3);
        assert_eq!(report.succeeded, vec!["edge-01"]);
        assert_eq!(report.never_attempted, vec!["master-01"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, Some(HostErrorKind::Upgrade));
        assert_eq!(report.failed[0].failed_in, HostUpgradeState::Upgrading);
        assert_eq!(
            report.phases_not_run,
            vec![
                PhaseName::MasterUpgrade,
                PhaseName::PostValidation,
                PhaseName::ServiceStart,
                PhaseName::FinalReport
            ]
        );
        assert_eq!(report.services_left_stopped, vec!["impala", "hive", "hdfs"]);
        assert!(report.recommendation.contains("hdfs, hive, impala"));
        assert!(report.operator_required);
        assert!(!report.safe_to_rerun);
        // rollback disabled: nothing was started
        assert!(cp.start_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_restarts_outstanding_services_in_reverse() {
        let cp = Arc::new(FakeControlPlane::new(["impala", "hive", "hdfs"]));
        let ctl = controller(cp.clone());
        ctl.stop(&ServiceTopology::new(vec!["impala".into(), "hive".into(), "hdfs".into()]))
            .await
            .unwrap();

        let report = FailureHandler::new(&ctl, true)
            .handle(&error(), &session())
            .await;

        assert_eq!(cp.start_calls(), vec!["hdfs", "hive", "impala"]);
        assert_eq!(report.services_restored, vec!["hdfs", "hive", "impala"]);
        assert!(report.services_left_stopped.is_empty());
        assert!(report.rollback_error.is_none());
        // the failed host is still failed; nothing reverts OS upgrades
        assert_eq!(report.succeeded, vec!["edge-01"]);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_rollback_is_reported() {
        let cp = Arc::new(FakeControlPlane::new(["impala", "hive", "hdfs"]));
        let ctl = controller(cp.clone());
        ctl.stop(&ServiceTopology::new(vec!["impala".into(), "hive".into(), "hdfs".into()]))
            .await
            .unwrap();
        cp.hang_on("hive", rollout_core::LifecycleDirection::Start);

        let report = FailureHandler::new(&ctl, true)
            .handle(&error(), &session())
            .await;

        assert_eq!(report.services_restored, vec!["hdfs"]);
        assert_eq!(report.services_left_stopped, vec!["impala", "hive"]);
        assert!(report.rollback_error.unwrap().contains("hive"));
    }

    #[tokio::test]
    async fn blocker_halt_is_safe_to_rerun() {
        let cp = Arc::new(FakeControlPlane::new(["impala"]));
        let ctl = controller(cp);
        let mut untouched = session();
        untouched.service_stop_order.clear();
        let blocker = RolloutError::ValidationBlocker {
            phase: PhaseName::ServiceStop,
            blockers: 2,
        };

        let report = FailureHandler::new(&ctl, true).handle(&blocker, &untouched).await;

        assert_eq!(report.exit_code(), 2);
        assert!(report.safe_to_rerun);
        assert!(!report.operator_required);
        assert!(report.services_left_stopped.is_empty());
    }
}
