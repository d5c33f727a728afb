//! Per-host upgrade state machine
//!
//! Drives one host through
//! `Pending -> BackingUp -> Preparing -> Upgrading -> Rebooting -> Verifying -> Succeeded`.
//! Any step can fail the host; the failure carries the step's error kind
//! and the state it happened in. Every transition is written to the
//! outcome table and the audit log before the step runs.
//!
//! # Steps
//!
//! - **BackingUp**: copy host config and package list under the backup
//!   root. Not retried.
//! - **Preparing**: install the upgrade utility and run its assessment.
//!   Blocking findings get one remediation pass and one re-assessment.
//! - **Upgrading**: run the upgrade and trigger the reboot.
//! - **Rebooting**: wait for the host to drop off, then to come back,
//!   within `reboot_timeout`. Overrunning is a `RebootTimeout` failure.
//! - **Verifying**: compare the reported OS version with the target. A
//!   mismatch is recorded as a warning; the host still succeeds.

mod assessment;

pub use assessment::{parse_assessment, Assessment, Finding};

use crate::audit::AuditLog;
use crate::outcome::OutcomeTable;
use crate::state_machine::validate_transition;
use crate::validation::checks::read_version;
use rollout_core::{
    render_command, CommandOutput, Host, HostErrorKind, HostUpgradeError, HostUpgradeState,
    RemoteError, RemoteExecutor, RolloutConfig, UpgradeCommands, VersionCheck,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Upgrades one host to a terminal state
///
/// Implementations write the host's progress into `outcomes` (their own
/// key only) and return the terminal state.
#[async_trait::async_trait]
pub trait HostUpgrader: Send + Sync {
    async fn upgrade(
        &self,
        host: &Host,
        target_version: &str,
        outcomes: &OutcomeTable,
    ) -> HostUpgradeState;
}

/// Upgrader that runs the configured commands over the remote channel
pub struct NodeUpgrader {
    remote: Arc<dyn RemoteExecutor>,
    commands: UpgradeCommands,
    backup_root: PathBuf,
    session_id: Uuid,
    reboot_timeout: Duration,
    reboot_poll_interval: Duration,
    audit: Arc<AuditLog>,
}

impl NodeUpgrader {
    #[must_use]
    pub fn new(
        remote: Arc<dyn RemoteExecutor>,
        config: &RolloutConfig,
        session_id: Uuid,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            remote,
            commands: config.upgrade.clone(),
            backup_root: config.backup_root.clone(),
            session_id,
            reboot_timeout: config.timeouts.reboot_timeout(),
            reboot_poll_interval: config.timeouts.reboot_poll_interval(),
            audit,
        }
    }

    fn vars(&self, host: &Host, target_version: &str) -> BTreeMap<&'static str, String> {
        let backup_dir = self
            .backup_root
            .join(self.session_id.to_string())
            .join(&host.hostname);
        BTreeMap::from([
            ("target", target_version.to_string()),
            ("hostname", host.hostname.clone()),
            ("session", self.session_id.to_string()),
            ("backup_dir", backup_dir.display().to_string()),
        ])
    }

    async fn drive(
        &self,
        run: &mut HostRun<'_>,
        target_version: &str,
    ) -> Result<(), HostUpgradeError> {
        let vars = self.vars(run.host, target_version);

        run.advance(HostUpgradeState::BackingUp)?;
        self.step(run, &self.commands.backup, &vars, HostErrorKind::Backup)
            .await?;

        run.advance(HostUpgradeState::Preparing)?;
        self.prepare(run, &vars).await?;

        run.advance(HostUpgradeState::Upgrading)?;
        self.step(run, &self.commands.execute, &vars, HostErrorKind::Upgrade)
            .await?;
        self.trigger_reboot(run, &vars).await?;

        run.advance(HostUpgradeState::Rebooting)?;
        self.await_reboot(run.host).await?;

        run.advance(HostUpgradeState::Verifying)?;
        let command = render_command(&self.commands.version, &vars);
        let check = read_version(self.remote.as_ref(), run.host, &command, target_version).await;
        run.record_version(check);

        run.advance(HostUpgradeState::Succeeded)
    }

    /// Run one command; any transport error or non-zero exit fails the host
    async fn step(
        &self,
        run: &HostRun<'_>,
        template: &str,
        vars: &BTreeMap<&'static str, String>,
        kind: HostErrorKind,
    ) -> Result<CommandOutput, HostUpgradeError> {
        let command = render_command(template, vars);
        let output = self
            .remote
            .execute(run.host, &command)
            .await
            .map_err(|e| HostUpgradeError::new(kind, run.state, e.to_string()))?;
        if !output.success() {
            return Err(HostUpgradeError::new(
                kind,
                run.state,
                format!("exit {}: {}", output.exit_code, output.failure_summary()),
            ));
        }
        Ok(output)
    }

    async fn prepare(
        &self,
        run: &mut HostRun<'_>,
        vars: &BTreeMap<&'static str, String>,
    ) -> Result<(), HostUpgradeError> {
        self.step(run, &self.commands.install, vars, HostErrorKind::Prepare)
            .await?;

        let mut assessment = self.assess(run, vars).await?;
        if assessment.is_blocked() {
            tracing::warn!(
                host = %run.host.hostname,
                blocking = %assessment.blocking_titles().join("; "),
                "assessment blocked, running remediation"
            );
            run.note("remediation", assessment.blocking_titles().join("; "));
            self.step(run, &self.commands.remediate, vars, HostErrorKind::Prepare)
                .await?;
            run.mark_remediated();
            assessment = self.assess(run, vars).await?;
            if assessment.is_blocked() {
                return Err(HostUpgradeError::new(
                    HostErrorKind::Prepare,
                    run.state,
                    format!(
                        "assessment still blocked after remediation: {}",
                        assessment.blocking_titles().join("; ")
                    ),
                ));
            }
        }
        for title in assessment.advisory_titles() {
            run.warn(format!("assessment: {title}"));
        }
        Ok(())
    }

    async fn assess(
        &self,
        run: &HostRun<'_>,
        vars: &BTreeMap<&'static str, String>,
    ) -> Result<Assessment, HostUpgradeError> {
        let output = self
            .step(run, &self.commands.assess, vars, HostErrorKind::Prepare)
            .await?;
        parse_assessment(&output.stdout).map_err(|e| {
            HostUpgradeError::new(
                HostErrorKind::Prepare,
                run.state,
                format!("unreadable assessment report: {e}"),
            )
        })
    }

    /// Reboot usually drops the connection; that counts as triggered.
    /// A refused reboot fails the host while it is still `Upgrading`.
    async fn trigger_reboot(
        &self,
        run: &HostRun<'_>,
        vars: &BTreeMap<&'static str, String>,
    ) -> Result<(), HostUpgradeError> {
        let command = render_command(&self.commands.reboot, vars);
        match self.remote.execute(run.host, &command).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(HostUpgradeError::new(
                HostErrorKind::Upgrade,
                run.state,
                format!(
                    "reboot refused, exit {}: {}",
                    output.exit_code,
                    output.failure_summary()
                ),
            )),
            Err(RemoteError::Connect { .. }) => {
                tracing::debug!(host = %run.host.hostname, "connection dropped by reboot");
                Ok(())
            }
            Err(e) => Err(HostUpgradeError::new(
                HostErrorKind::Upgrade,
                run.state,
                format!("reboot not triggered: {e}"),
            )),
        }
    }

    /// Host must first become unreachable, then reachable again
    async fn await_reboot(&self, host: &Host) -> Result<(), HostUpgradeError> {
        let wait = async {
            while self.remote.is_reachable(host).await {
                tokio::time::sleep(self.reboot_poll_interval).await;
            }
            tracing::info!(host = %host.hostname, "host went down, waiting for it to return");
            loop {
                tokio::time::sleep(self.reboot_poll_interval).await;
                if self.remote.is_reachable(host).await {
                    break;
                }
            }
        };
        tokio::time::timeout(self.reboot_timeout, wait)
            .await
            .map_err(|_| {
                HostUpgradeError::new(
                    HostErrorKind::RebootTimeout,
                    HostUpgradeState::Rebooting,
                    format!(
                        "did not return within {}s; may still be mid-upgrade",
                        self.reboot_timeout.as_secs()
                    ),
                )
            })
    }
}

#[async_trait::async_trait]
impl HostUpgrader for NodeUpgrader {
    async fn upgrade(
        &self,
        host: &Host,
        target_version: &str,
        outcomes: &OutcomeTable,
    ) -> HostUpgradeState {
        let mut run = HostRun {
            host,
            state: HostUpgradeState::Pending,
            outcomes,
            audit: &self.audit,
        };
        match self.drive(&mut run, target_version).await {
            Ok(()) => HostUpgradeState::Succeeded,
            Err(e) => {
                run.fail(e);
                HostUpgradeState::Failed
            }
        }
    }
}

impl std::fmt::Debug for NodeUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeUpgrader")
            .field("session_id", &self.session_id)
            .field("backup_root", &self.backup_root)
            .field("reboot_timeout", &self.reboot_timeout)
            .finish_non_exhaustive()
    }
}

/// One host's walk through the state machine
struct HostRun<'a> {
    host: &'a Host,
    state: HostUpgradeState,
    outcomes: &'a OutcomeTable,
    audit: &'a AuditLog,
}

impl HostRun<'_> {
    fn advance(&mut self, next: HostUpgradeState) -> Result<(), HostUpgradeError> {
        validate_transition(self.state, next).map_err(|e| {
            HostUpgradeError::new(HostErrorKind::Upgrade, self.state, e.to_string())
        })?;
        self.state = next;
        self.outcomes.set_state(&self.host.hostname, next);
        self.audit.append(&self.host.hostname, next.as_str(), "");
        tracing::info!(
            host = %self.host.hostname,
            role = %self.host.role,
            state = %next,
            "host state"
        );
        Ok(())
    }

    fn fail(&mut self, error: HostUpgradeError) {
        tracing::error!(
            host = %self.host.hostname,
            kind = %error.kind,
            during = %error.state,
            error = %error.message,
            "host upgrade failed"
        );
        self.audit
            .append(&self.host.hostname, "failed", error.to_string());
        self.outcomes
            .update(&self.host.hostname, |o| o.failure = Some(error.into()));
        self.outcomes
            .set_state(&self.host.hostname, HostUpgradeState::Failed);
        self.state = HostUpgradeState::Failed;
    }

    fn note(&self, action: &str, detail: String) {
        self.audit.append(&self.host.hostname, action, detail);
    }

    fn warn(&self, warning: String) {
        self.outcomes
            .update(&self.host.hostname, |o| o.warnings.push(warning));
    }

    fn mark_remediated(&self) {
        self.outcomes
            .update(&self.host.hostname, |o| o.remediated = true);
    }

    fn record_version(&self, check: VersionCheck) {
        match &check {
            VersionCheck::Confirmed { version } => {
                tracing::info!(host = %self.host.hostname, version = %version, "version confirmed");
            }
            VersionCheck::Mismatch { reported, expected } => {
                tracing::warn!(
                    host = %self.host.hostname,
                    reported = %reported,
                    expected = %expected,
                    "version mismatch after upgrade"
                );
                self.warn(format!("reports {reported}, expected {expected}"));
            }
            VersionCheck::Unknown { reason } => {
                tracing::warn!(host = %self.host.hostname, reason = %reason, "version unknown after upgrade");
                self.warn(format!("version unknown: {reason}"));
            }
        }
        match serde_json::to_string(&check) {
            Ok(detail) => self.note("version-check", detail),
            Err(e) => tracing::warn!(
                host = %self.host.hostname,
                error = %e,
                "version check not encodable, left out of audit"
            ),
        }
        self.outcomes
            .update(&self.host.hostname, |o| o.version_check = Some(check));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::Role;
    use rollout_test_utils::{test_config, FakeRemote, Step, TARGET_VERSION};

    fn setup() -> (Arc<FakeRemote>, NodeUpgrader, Host, OutcomeTable, Arc<AuditLog>) {
        let remote = Arc::new(FakeRemote::new("7.9", TARGET_VERSION));
        let audit = Arc::new(AuditLog::new());
        let upgrader = NodeUpgrader::new(remote.clone(), &test_config(), Uuid::nil(), audit.clone());
        let host = Host::new("worker-01", "10.0.20.1", Role::Worker);
        let table = OutcomeTable::new(std::slice::from_ref(&host));
        (remote, upgrader, host, table, audit)
    }

    #[tokio::test(start_paused = true)]
    async fn clean_upgrade_succeeds() {
        let (remote, upgrader, host, table, audit) = setup();
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Succeeded);

        let outcome = table.get("worker-01").unwrap();
        assert_eq!(
            outcome.version_check,
            Some(VersionCheck::Confirmed {
                version: TARGET_VERSION.into()
            })
        );
        assert!(!outcome.remediated);
        assert_eq!(
            remote.steps_for("worker-01"),
            vec![
                Step::Backup,
                Step::Install,
                Step::Assess,
                Step::Execute,
                Step::Reboot,
                Step::Version
            ]
        );
        let actions: Vec<_> = audit.events().into_iter().map(|e| e.action).collect();
        assert_eq!(&actions[..3], ["backing-up", "preparing", "upgrading"]);
        assert!(audit.verify_integrity().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn backup_dir_is_per_session_and_host() {
        let (remote, upgrader, host, table, _) = setup();
        upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        let backup = &remote.commands_for("worker-01")[0];
        let expected = format!(
            "/var/backups/rollout/{}/worker-01",
            Uuid::nil()
        );
        assert!(backup.contains(&expected), "{backup}");
    }

    #[tokio::test(start_paused = true)]
    async fn backup_failure_is_terminal() {
        let (remote, upgrader, host, table, _) = setup();
        remote.fail("worker-01", Step::Backup, 1, "tar: /var/backups: No space left on device");
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Failed);
        let failure = table.get("worker-01").unwrap().failure.unwrap();
        assert_eq!(failure.kind, HostErrorKind::Backup);
        assert_eq!(failure.failed_in, HostUpgradeState::BackingUp);
        assert!(failure.message.contains("No space left"));
        assert!(!remote.steps_for("worker-01").contains(&Step::Execute));
    }

    #[tokio::test(start_paused = true)]
    async fn one_remediation_pass_clears_inhibitor() {
        let (remote, upgrader, host, table, _) = setup();
        remote.inhibit_until_remediated("worker-01");
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Succeeded);
        assert!(table.get("worker-01").unwrap().remediated);
        let steps = remote.steps_for("worker-01");
        assert_eq!(steps.iter().filter(|s| **s == Step::Assess).count(), 2);
        assert_eq!(steps.iter().filter(|s| **s == Step::Remediate).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_inhibitor_fails_after_single_retry() {
        let (remote, upgrader, host, table, _) = setup();
        remote.inhibit_always("worker-01");
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Failed);
        let failure = table.get("worker-01").unwrap().failure.unwrap();
        assert_eq!(failure.kind, HostErrorKind::Prepare);
        assert!(failure.message.contains("Unsupported kernel modules"));
        let steps = remote.steps_for("worker-01");
        assert_eq!(steps.iter().filter(|s| **s == Step::Assess).count(), 2);
        assert!(!steps.contains(&Step::Execute));
    }

    #[tokio::test(start_paused = true)]
    async fn upgrade_failure_is_not_a_reboot_timeout() {
        let (remote, upgrader, host, table, _) = setup();
        remote.fail("worker-01", Step::Execute, 1, "transaction check error");
        upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        let outcome = table.get("worker-01").unwrap();
        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.kind, HostErrorKind::Upgrade);
        assert_eq!(failure.failed_in, HostUpgradeState::Upgrading);
        assert!(!outcome.is_reboot_timeout());
        assert!(!remote.steps_for("worker-01").contains(&Step::Reboot));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_reboot_fails_while_upgrading() {
        let (remote, upgrader, host, table, _) = setup();
        remote.fail("worker-01", Step::Reboot, 1, "Failed to start reboot.target: Access denied");
        let started = tokio::time::Instant::now();
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Failed);
        assert!(started.elapsed() < Duration::from_secs(60));
        let outcome = table.get("worker-01").unwrap();
        assert!(!outcome.is_reboot_timeout());
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, HostErrorKind::Upgrade);
        assert_eq!(failure.failed_in, HostUpgradeState::Upgrading);
        assert!(failure.message.contains("Access denied"), "{}", failure.message);
        assert!(!remote.steps_for("worker-01").contains(&Step::Version));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connection_counts_as_reboot() {
        let (remote, upgrader, host, table, _) = setup();
        remote.drop_on_reboot("worker-01");
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Succeeded);
        assert_eq!(remote.upgraded_hosts(), vec!["worker-01"]);
    }

    #[tokio::test(start_paused = true)]
    async fn host_that_never_returns_times_out() {
        let (remote, upgrader, host, table, _) = setup();
        remote.never_returns("worker-01");
        let started = tokio::time::Instant::now();
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Failed);
        assert!(started.elapsed() >= Duration::from_secs(7200));
        let outcome = table.get("worker-01").unwrap();
        assert!(outcome.is_reboot_timeout());
        assert_eq!(
            outcome.failure.unwrap().failed_in,
            HostUpgradeState::Rebooting
        );
    }

    #[tokio::test(start_paused = true)]
    async fn version_mismatch_warns_but_succeeds() {
        let (remote, upgrader, host, table, _) = setup();
        remote.set_upgraded_version("worker-01", "8.8");
        let state = upgrader.upgrade(&host, TARGET_VERSION, &table).await;
        assert_eq!(state, HostUpgradeState::Succeeded);
        let outcome = table.get("worker-01").unwrap();
        assert!(outcome.version_check.as_ref().unwrap().is_warning());
        assert!(outcome.warnings.iter().any(|w| w.contains("8.8")));
    }
}
