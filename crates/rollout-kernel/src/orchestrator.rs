//! Phase orchestrator
//!
//! Walks the plan in dependency order and owns the session. For each phase:
//!
//! 1. Stop if the operator aborted
//! 2. Skip when the phase selects no hosts
//! 3. Before a mutating phase, halt if the latest validation has a blocker
//! 4. Run the phase body; a failure halts everything after it
//!
//! On halt the failure handler builds the account of who got upgraded and
//! who was never touched. The returned [`RunReport`] is the only output;
//! persisting it is up to the caller.

use crate::abort::AbortSignal;
use crate::audit::AuditLog;
use crate::failure::FailureHandler;
use crate::inventory::{self, InventorySource};
use crate::node::{HostUpgrader, NodeUpgrader};
use crate::outcome::OutcomeTable;
use crate::plan::{ConcurrencyPolicy, Phase, UpgradePlan};
use crate::report::RunReport;
use crate::scheduler::{auto_batch_size, partition, BatchScheduler};
use crate::services::ServiceController;
use crate::validation::{CheckSet, Validator};
use chrono::Utc;
use indexmap::IndexMap;
use rollout_core::{
    CheckStatus, ControlPlane, HaltKind, Host, PhaseName, PhaseRecord, PhaseStatus,
    RemoteExecutor, Role, RolloutConfig, RolloutError, ServiceTopology, SessionStatus,
    UpgradeSession, ValidationReport,
};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

pub struct Orchestrator {
    config: RolloutConfig,
    control_plane: Arc<dyn ControlPlane>,
    remote: Arc<dyn RemoteExecutor>,
    upgrader: Option<Arc<dyn HostUpgrader>>,
    abort: AbortSignal,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: RolloutConfig,
        control_plane: Arc<dyn ControlPlane>,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            config,
            control_plane,
            remote,
            upgrader: None,
            abort: AbortSignal::never(),
        }
    }

    /// Replace the per-host upgrader (defaults to [`NodeUpgrader`])
    #[must_use]
    pub fn with_upgrader(mut self, upgrader: Arc<dyn HostUpgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub async fn resolve_inventory(&self) -> Result<Vec<Host>, RolloutError> {
        let source = InventorySource::from_config(&self.config.inventory);
        Ok(inventory::resolve(&source, self.control_plane.as_ref(), &self.config.roles).await?)
    }

    /// Configured worker batch size, or one derived from the worker count
    #[must_use]
    pub fn worker_batch_size(&self, hosts: &[Host]) -> usize {
        self.config.batch.worker_batch_size.unwrap_or_else(|| {
            let workers = hosts.iter().filter(|h| h.role == Role::Worker).count();
            auto_batch_size(workers, self.config.batch.redundancy_factor)
        })
    }

    /// Everything `apply` would do, without mutating anything
    pub async fn plan(&self) -> Result<PlanPreview, RolloutError> {
        let target = self.config.require_target_version()?.to_string();
        self.config.validate()?;
        let hosts = self.resolve_inventory().await?;
        let controller = ServiceController::from_config(self.control_plane.clone(), &self.config);
        let topology = controller
            .topology(self.config.services.order.as_deref())
            .await?;
        let plan = UpgradePlan::standard(self.worker_batch_size(&hosts));

        let phases = plan
            .execution_order()
            .map(|phase| {
                let selected = phase.hosts.select(&hosts);
                let batches = if phase.name.upgrade_role().is_some() {
                    partition(&selected, phase.policy)
                        .into_iter()
                        .map(|batch| batch.into_iter().map(|h| h.hostname).collect())
                        .collect()
                } else {
                    Vec::new()
                };
                PhasePreview {
                    name: phase.name,
                    policy: phase.name.upgrade_role().map(|_| phase.policy),
                    host_count: selected.len(),
                    batches,
                }
            })
            .collect();

        let checks = CheckSet::pre_upgrade(
            &self.config,
            &target,
            self.remote.clone(),
            self.control_plane.clone(),
        );
        let validation = Validator::from_config(&self.config)
            .validate(&hosts, &checks)
            .await;

        Ok(PlanPreview {
            target_version: target,
            hosts,
            topology,
            phases,
            validation,
        })
    }

    /// Resolve the inventory and run the standard pipeline
    pub async fn apply(&self) -> Result<RunReport, RolloutError> {
        self.config.require_target_version()?;
        self.config.validate()?;
        let hosts = self.resolve_inventory().await?;
        let plan = UpgradePlan::standard(self.worker_batch_size(&hosts));
        self.run(&plan, &hosts).await
    }

    /// Execute `plan` against `hosts`
    ///
    /// Errors only when the configuration cannot start a run; every halt
    /// after that is reported inside the returned report.
    pub async fn run(&self, plan: &UpgradePlan, hosts: &[Host]) -> Result<RunReport, RolloutError> {
        let target = self.config.require_target_version()?.to_string();
        self.config.validate()?;

        let session_id = Uuid::new_v4();
        let audit = Arc::new(AuditLog::new());
        let upgrader: Arc<dyn HostUpgrader> = match &self.upgrader {
            Some(upgrader) => upgrader.clone(),
            None => Arc::new(NodeUpgrader::new(
                self.remote.clone(),
                &self.config,
                session_id,
                audit.clone(),
            )),
        };
        let scheduler = BatchScheduler::new(upgrader, self.config.batch.cooldown(), self.abort.clone())
            .with_continue_on_failure(self.config.batch.continue_on_host_failure);
        let controller = ServiceController::from_config(self.control_plane.clone(), &self.config);

        let session = UpgradeSession {
            session_id,
            target_version: target.clone(),
            started_at: Utc::now(),
            finished_at: None,
            backup_root: self.config.backup_root.clone(),
            status: SessionStatus::Running,
            halted_in: None,
            per_host_outcome: IndexMap::new(),
            phases: plan
                .execution_order()
                .map(|p| PhaseRecord::pending(p.name))
                .collect(),
            service_stop_order: Vec::new(),
            service_start_order: Vec::new(),
        };
        let mut ctx = RunContext {
            target,
            outcomes: OutcomeTable::new(hosts),
            audit,
            scheduler,
            controller,
            validator: Validator::from_config(&self.config),
            session,
            pre_validation: None,
            post_validation: None,
            deferred: Vec::new(),
        };
        ctx.audit
            .append("session", "started", format!("{session_id} -> {}", ctx.target));
        tracing::info!(
            session = %session_id,
            target = %ctx.target,
            hosts = hosts.len(),
            phases = plan.len(),
            "rollout started"
        );

        let halt = self.run_phases(&mut ctx, plan, hosts).await;
        Ok(self.finish(ctx, halt).await)
    }

    async fn run_phases(
        &self,
        ctx: &mut RunContext,
        plan: &UpgradePlan,
        hosts: &[Host],
    ) -> Option<RolloutError> {
        for phase in plan.execution_order() {
            let name = phase.name;
            if self.abort.is_aborted() {
                tracing::warn!(phase = %name, "abort requested, not starting phase");
                ctx.halt_before(name, "aborted before start");
                return Some(RolloutError::Aborted { phase: name });
            }

            let selected = phase.hosts.select(hosts);
            if selected.is_empty() {
                tracing::info!(phase = %name, "no hosts selected, skipping");
                ctx.finish_phase(name, PhaseStatus::Skipped, Some("no hosts selected".into()));
                continue;
            }

            if name.is_mutating() {
                if let Some(report) = ctx.latest_validation().filter(|r| r.is_blocked()) {
                    let blockers = report.with_status(CheckStatus::Blocker).len();
                    tracing::error!(phase = %name, blockers, "validation blockers, not starting mutating phase");
                    ctx.halt_before(name, format!("blocked by {blockers} validation blocker(s)"));
                    return Some(RolloutError::ValidationBlocker {
                        phase: name,
                        blockers,
                    });
                }
            }

            ctx.start_phase(name, selected.len());
            let span = tracing::info_span!("phase", phase = %name);
            match self.execute_phase(ctx, phase, &selected).instrument(span).await {
                Ok(detail) => ctx.finish_phase(name, PhaseStatus::Succeeded, detail),
                Err(error) => {
                    ctx.finish_phase(name, PhaseStatus::Failed, Some(error.to_string()));
                    ctx.session.halted_in = Some(name);
                    return Some(error);
                }
            }
        }
        None
    }

    /// Phase body; `Ok` carries an optional detail for the phase record
    async fn execute_phase(
        &self,
        ctx: &mut RunContext,
        phase: &Phase,
        hosts: &[Host],
    ) -> Result<Option<String>, RolloutError> {
        match phase.name {
            PhaseName::PreValidation => {
                let checks = CheckSet::pre_upgrade(
                    &self.config,
                    &ctx.target,
                    self.remote.clone(),
                    self.control_plane.clone(),
                );
                let report = ctx.validator.validate(hosts, &checks).await;
                let detail = validation_detail(&report);
                ctx.pre_validation = Some(report);
                Ok(Some(detail))
            }
            PhaseName::PostValidation => {
                let checks = CheckSet::post_upgrade(&self.config, &ctx.target, self.remote.clone());
                let report = ctx.validator.validate(hosts, &checks).await;
                let detail = validation_detail(&report);
                ctx.post_validation = Some(report);
                Ok(Some(detail))
            }
            PhaseName::ServiceStop => {
                let topology = ctx
                    .controller
                    .topology(self.config.services.order.as_deref())
                    .await?;
                match ctx.controller.stop(&topology).await {
                    Ok(stopped) => {
                        ctx.audit
                            .append(phase.name.as_str(), "services-stopped", stopped.join(","));
                        let detail = format!("{} service(s) stopped", stopped.len());
                        ctx.session.service_stop_order = stopped;
                        Ok(Some(detail))
                    }
                    Err(e) => {
                        ctx.session.service_stop_order = e.transitioned().to_vec();
                        Err(e.into())
                    }
                }
            }
            PhaseName::ServiceStart => {
                if ctx.session.service_stop_order.is_empty() {
                    return Ok(Some("no services stopped by this run".into()));
                }
                let topology = ServiceTopology::new(ctx.session.service_stop_order.clone());
                match ctx.controller.start(&topology).await {
                    Ok(started) => {
                        ctx.audit
                            .append(phase.name.as_str(), "services-started", started.join(","));
                        let detail = format!("{} service(s) started", started.len());
                        ctx.session.service_start_order = started;
                        Ok(Some(detail))
                    }
                    Err(e) => {
                        ctx.session.service_start_order = e.transitioned().to_vec();
                        Err(e.into())
                    }
                }
            }
            PhaseName::EdgeUpgrade | PhaseName::WorkerUpgrade | PhaseName::MasterUpgrade => {
                self.upgrade_role(ctx, phase, hosts).await
            }
            PhaseName::FinalReport => {
                let snapshot = ctx.outcomes.snapshot();
                let upgraded = snapshot.values().filter(|o| o.is_succeeded()).count();
                Ok(Some(format!("{upgraded}/{} host(s) upgraded", snapshot.len())))
            }
        }
    }

    async fn upgrade_role(
        &self,
        ctx: &mut RunContext,
        phase: &Phase,
        hosts: &[Host],
    ) -> Result<Option<String>, RolloutError> {
        let Some(role) = phase.name.upgrade_role() else {
            return Ok(None);
        };
        let run = ctx
            .scheduler
            .run_role(role, hosts, phase.policy, &ctx.target, &ctx.outcomes)
            .await;
        if run.aborted {
            return Err(RolloutError::Aborted { phase: phase.name });
        }

        let failed = run.failed();
        let detail = format!(
            "{} host(s) in {} batch(es)",
            run.outcomes.len(),
            run.batches_launched
        );
        if failed.is_empty() {
            return Ok(Some(detail));
        }

        let timed_out = failed.iter().all(|host| {
            ctx.outcomes
                .get(host)
                .is_some_and(|o| o.is_reboot_timeout())
        });
        let error = if timed_out {
            RolloutError::RebootTimeout {
                phase: phase.name,
                hosts: failed,
            }
        } else {
            RolloutError::HostUpgrade {
                phase: phase.name,
                failed,
            }
        };
        if self.config.batch.continue_on_host_failure {
            tracing::warn!(phase = %phase.name, error = %error, "continuing past failed hosts");
            let detail = format!("{detail}; {error}");
            ctx.deferred.push(error);
            return Ok(Some(detail));
        }
        Err(error)
    }

    async fn finish(&self, mut ctx: RunContext, halt: Option<RolloutError>) -> RunReport {
        ctx.session.per_host_outcome = ctx.outcomes.snapshot();
        let mut failure = None;
        let (exit_code, error) = match halt {
            Some(error) => {
                ctx.session.status = SessionStatus::Halted;
                let report = FailureHandler::new(&ctx.controller, self.config.rollback_enabled)
                    .handle(&error, &ctx.session)
                    .await;
                ctx.session
                    .service_start_order
                    .extend(report.services_restored.iter().cloned());
                failure = Some(report);
                (error.exit_code(), Some(error.to_string()))
            }
            None if !ctx.deferred.is_empty() => {
                ctx.session.status = SessionStatus::Completed;
                let code = if ctx
                    .deferred
                    .iter()
                    .any(|e| e.kind() == HaltKind::HostUpgrade)
                {
                    HaltKind::HostUpgrade.exit_code()
                } else {
                    HaltKind::RebootTimeout.exit_code()
                };
                let message = ctx
                    .deferred
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                (code, Some(message))
            }
            None => {
                ctx.session.status = SessionStatus::Completed;
                (0, None)
            }
        };
        ctx.session.finished_at = Some(Utc::now());
        ctx.audit.append(
            "session",
            ctx.session.status.to_string(),
            error.clone().unwrap_or_default(),
        );

        tracing::info!(
            session = %ctx.session.session_id,
            status = %ctx.session.status,
            succeeded = ctx.session.succeeded_hosts().len(),
            failed = ctx.session.failed_hosts().len(),
            never_attempted = ctx.session.never_attempted().len(),
            exit_code,
            "rollout finished"
        );

        RunReport {
            session: ctx.session,
            pre_validation: ctx.pre_validation,
            post_validation: ctx.post_validation,
            error,
            failure,
            exit_code,
            audit: ctx.audit.events(),
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("target_version", &self.config.target_version)
            .field("custom_upgrader", &self.upgrader.is_some())
            .finish_non_exhaustive()
    }
}

fn validation_detail(report: &ValidationReport) -> String {
    format!(
        "{}: {} blocker(s), {} warning(s)",
        report.aggregate(),
        report.with_status(CheckStatus::Blocker).len(),
        report.with_status(CheckStatus::Warning).len()
    )
}

/// Mutable state of one run
struct RunContext {
    target: String,
    outcomes: OutcomeTable,
    audit: Arc<AuditLog>,
    scheduler: BatchScheduler,
    controller: ServiceController,
    validator: Validator,
    session: UpgradeSession,
    pre_validation: Option<ValidationReport>,
    post_validation: Option<ValidationReport>,
    /// Host failures let through by the continuation policy
    deferred: Vec<RolloutError>,
}

impl RunContext {
    fn latest_validation(&self) -> Option<&ValidationReport> {
        self.post_validation
            .as_ref()
            .or(self.pre_validation.as_ref())
    }

    fn record(&mut self, name: PhaseName) -> Option<&mut PhaseRecord> {
        self.session.phases.iter_mut().find(|p| p.name == name)
    }

    fn start_phase(&mut self, name: PhaseName, hosts: usize) {
        if let Some(record) = self.record(name) {
            record.status = PhaseStatus::Running;
            record.started_at = Some(Utc::now());
        }
        self.audit
            .append(name.as_str(), "started", format!("{hosts} host(s)"));
        tracing::info!(phase = %name, hosts, "phase started");
    }

    fn finish_phase(&mut self, name: PhaseName, status: PhaseStatus, detail: Option<String>) {
        if let Some(record) = self.record(name) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.detail.clone_from(&detail);
        }
        self.audit
            .append(name.as_str(), status.as_str(), detail.clone().unwrap_or_default());
        match status {
            PhaseStatus::Failed => {
                tracing::error!(phase = %name, detail = detail.as_deref().unwrap_or(""), "phase failed");
            }
            _ => tracing::info!(phase = %name, %status, detail = detail.as_deref().unwrap_or(""), "phase finished"),
        }
    }

    /// Halt without starting `name`; the phase stays pending
    fn halt_before(&mut self, name: PhaseName, reason: impl Into<String>) {
        let reason = reason.into();
        if let Some(record) = self.record(name) {
            record.detail = Some(reason.clone());
        }
        self.audit.append(name.as_str(), "halted", reason);
        self.session.halted_in = Some(name);
    }
}

/// Dry-run view of a rollout
#[derive(Debug, Clone)]
pub struct PlanPreview {
    pub target_version: String,
    pub hosts: Vec<Host>,
    pub topology: ServiceTopology,
    pub phases: Vec<PhasePreview>,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePreview {
    pub name: PhaseName,
    /// Set for upgrade phases
    pub policy: Option<ConcurrencyPolicy>,
    pub host_count: usize,
    /// Hostnames per batch, upgrade phases only
    pub batches: Vec<Vec<String>>,
}

impl PlanPreview {
    /// 0 when `apply` would proceed, 2 when validation blocks it
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.validation.is_blocked() {
            HaltKind::ValidationBlocker.exit_code()
        } else {
            0
        }
    }

    fn hosts_with(&self, role: Role) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.role == role)
            .map(|h| h.hostname.as_str())
            .collect()
    }
}

impl fmt::Display for PlanPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Target version: {}", self.target_version)?;
        writeln!(f, "\nHosts ({}):", self.hosts.len())?;
        for role in Role::ALL {
            let hosts = self.hosts_with(role);
            writeln!(f, "  {role:<7} {:>3}  {}", hosts.len(), hosts.join(", "))?;
        }
        writeln!(f, "\nService stop order:  {}", self.topology.stop_order().join(" -> "))?;
        writeln!(f, "Service start order: {}", self.topology.start_order().join(" -> "))?;

        writeln!(f, "\nPhases:")?;
        for (index, phase) in self.phases.iter().enumerate() {
            write!(f, "  {}. {:<16} {} host(s)", index + 1, phase.name.as_str(), phase.host_count)?;
            if let Some(policy) = phase.policy {
                write!(f, ", {policy}")?;
            }
            writeln!(f)?;
            for (batch, hosts) in phase.batches.iter().enumerate() {
                writeln!(f, "       batch {}: {}", batch + 1, hosts.join(", "))?;
            }
        }

        writeln!(f, "\nPre-upgrade validation: {}", self.validation.aggregate())?;
        for status in [CheckStatus::Blocker, CheckStatus::Warning] {
            for (host, check) in self.validation.with_status(status) {
                writeln!(f, "  {status:<7} {host}/{}: {}", check.check_name, check.detail)?;
            }
        }
        if self.validation.is_blocked() {
            write!(f, "\napply would halt before any change")
        } else {
            write!(f, "\napply would proceed")
        }
    }
}
