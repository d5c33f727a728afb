//! Validation aggregator
//!
//! Runs a check set against every host and reduces the outcomes into a
//! [`ValidationReport`]. Pre- and post-upgrade runs use different check
//! sets and the same aggregation.
//!
//! - Checks for one host run concurrently
//! - Hosts run with bounded fan-out (`validation.parallelism`)
//! - A check that errors or overruns `check_timeout` becomes a `Blocker`
//!   for that host only; other hosts are unaffected
//!
//! The aggregator never halts anything. The orchestrator reads the
//! aggregate and decides.

pub mod checks;

use crate::error::CheckError;
use futures::stream::{self, StreamExt};
use rollout_core::{
    CheckOutcome, CheckStatus, ControlPlane, Host, HostValidation, RemoteExecutor, RolloutConfig,
    ValidationKind, ValidationReport,
};
use std::sync::Arc;
use std::time::Duration;

pub use checks::{
    CurrentVersionCheck, DiskSpaceCheck, FleetHealthCheck, ReachabilityCheck, VersionMatchCheck,
};

/// Readiness check against one host
#[async_trait::async_trait]
pub trait HostCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, host: &Host) -> Result<CheckOutcome, CheckError>;
}

/// Check concerning the fleet as a whole
#[async_trait::async_trait]
pub trait FleetCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<CheckOutcome, CheckError>;
}

/// Checks for one validation run
#[derive(Clone)]
pub struct CheckSet {
    pub kind: ValidationKind,
    pub host_checks: Vec<Arc<dyn HostCheck>>,
    pub fleet_checks: Vec<Arc<dyn FleetCheck>>,
}

impl std::fmt::Debug for CheckSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckSet")
            .field("kind", &self.kind)
            .field(
                "host_checks",
                &self.host_checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field(
                "fleet_checks",
                &self.fleet_checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CheckSet {
    #[must_use]
    pub fn new(kind: ValidationKind) -> Self {
        Self {
            kind,
            host_checks: Vec::new(),
            fleet_checks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_host_check(mut self, check: Arc<dyn HostCheck>) -> Self {
        self.host_checks.push(check);
        self
    }

    #[must_use]
    pub fn with_fleet_check(mut self, check: Arc<dyn FleetCheck>) -> Self {
        self.fleet_checks.push(check);
        self
    }

    /// Reachability, free disk, current version, fleet health
    #[must_use]
    pub fn pre_upgrade(
        config: &RolloutConfig,
        target_version: &str,
        remote: Arc<dyn RemoteExecutor>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self::new(ValidationKind::Pre)
            .with_host_check(Arc::new(ReachabilityCheck::new(remote.clone())))
            .with_host_check(Arc::new(DiskSpaceCheck::new(
                remote.clone(),
                config.validation.disk_path.clone(),
                config.validation.min_free_disk_mb,
            )))
            .with_host_check(Arc::new(CurrentVersionCheck::new(
                remote,
                config.upgrade.version.clone(),
                target_version,
            )))
            .with_fleet_check(Arc::new(FleetHealthCheck::new(control_plane)))
    }

    /// Reachability and version match
    #[must_use]
    pub fn post_upgrade(
        config: &RolloutConfig,
        target_version: &str,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self::new(ValidationKind::Post)
            .with_host_check(Arc::new(ReachabilityCheck::new(remote.clone())))
            .with_host_check(Arc::new(VersionMatchCheck::new(
                remote,
                config.upgrade.version.clone(),
                target_version,
            )))
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    parallelism: usize,
    check_timeout: Duration,
}

impl Validator {
    #[must_use]
    pub fn new(parallelism: usize, check_timeout: Duration) -> Self {
        Self {
            parallelism: parallelism.max(1),
            check_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &RolloutConfig) -> Self {
        Self::new(
            config.validation.parallelism,
            config.timeouts.check_timeout(),
        )
    }

    /// Run `checks` against `hosts`; hosts appear in input order
    pub async fn validate(&self, hosts: &[Host], checks: &CheckSet) -> ValidationReport {
        let per_host: Vec<HostValidation> = stream::iter(hosts)
            .map(|host| self.validate_host(host, checks))
            .buffered(self.parallelism)
            .collect()
            .await;

        let fleet = futures::future::join_all(
            checks
                .fleet_checks
                .iter()
                .map(|check| self.guarded(check.name(), check.run())),
        )
        .await;

        let mut report = ValidationReport::new(checks.kind);
        report.hosts = per_host;
        report.fleet_checks = fleet;

        let aggregate = report.aggregate();
        tracing::info!(
            kind = ?checks.kind,
            hosts = hosts.len(),
            blockers = report.with_status(CheckStatus::Blocker).len(),
            warnings = report.with_status(CheckStatus::Warning).len(),
            %aggregate,
            "validation complete"
        );
        for (host, check) in report.with_status(CheckStatus::Blocker) {
            tracing::warn!(host, check = %check.check_name, detail = %check.detail, "blocker");
        }
        report
    }

    async fn validate_host(&self, host: &Host, checks: &CheckSet) -> HostValidation {
        let outcomes = futures::future::join_all(
            checks
                .host_checks
                .iter()
                .map(|check| self.guarded(check.name(), check.run(host))),
        )
        .await;
        HostValidation {
            hostname: host.hostname.clone(),
            checks: outcomes,
        }
    }

    /// Bound a check in time and turn failures into blockers
    async fn guarded<F>(&self, name: &'static str, check: F) -> CheckOutcome
    where
        F: std::future::Future<Output = Result<CheckOutcome, CheckError>>,
    {
        match tokio::time::timeout(self.check_timeout, check).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => CheckOutcome::blocker(name, format!("check failed: {e}")),
            Err(_) => CheckOutcome::blocker(
                name,
                format!("check timed out after {}s", self.check_timeout.as_secs()),
            ),
        }
    }
}
