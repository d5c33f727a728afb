//! Built-in readiness checks

use super::{FleetCheck, HostCheck};
use crate::error::CheckError;
use rollout_core::{CheckOutcome, ControlPlane, Host, RemoteExecutor, VersionCheck};
use std::sync::Arc;

/// Host answers on the remote channel
pub struct ReachabilityCheck {
    remote: Arc<dyn RemoteExecutor>,
}

impl ReachabilityCheck {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteExecutor>) -> Self {
        Self { remote }
    }
}

#[async_trait::async_trait]
impl HostCheck for ReachabilityCheck {
    fn name(&self) -> &'static str {
        "reachability"
    }

    async fn run(&self, host: &Host) -> Result<CheckOutcome, CheckError> {
        Ok(if self.remote.is_reachable(host).await {
            CheckOutcome::pass(self.name(), format!("{} reachable", host.address))
        } else {
            CheckOutcome::blocker(self.name(), format!("{} unreachable", host.address))
        })
    }
}

/// Free space on the volume the upgrade writes to
///
/// Blocker below the minimum, warning below twice the minimum.
pub struct DiskSpaceCheck {
    remote: Arc<dyn RemoteExecutor>,
    path: String,
    min_free_mb: u64,
}

impl DiskSpaceCheck {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteExecutor>, path: String, min_free_mb: u64) -> Self {
        Self {
            remote,
            path,
            min_free_mb,
        }
    }

    fn command(&self) -> String {
        format!("df -Pm {} | awk 'NR==2 {{print $4}}'", self.path)
    }
}

#[async_trait::async_trait]
impl HostCheck for DiskSpaceCheck {
    fn name(&self) -> &'static str {
        "disk-space"
    }

    async fn run(&self, host: &Host) -> Result<CheckOutcome, CheckError> {
        let output = self.remote.execute(host, &self.command()).await?;
        if !output.success() {
            return Err(CheckError::Command {
                code: output.exit_code,
                summary: output.failure_summary(),
            });
        }
        let free_mb: u64 = output
            .stdout
            .trim()
            .parse()
            .map_err(|_| CheckError::Unparseable(format!("free space '{}'", output.stdout.trim())))?;
        let detail = format!("{free_mb} MB free on {}", self.path);
        Ok(if free_mb < self.min_free_mb {
            CheckOutcome::blocker(
                self.name(),
                format!("{detail} (need {} MB)", self.min_free_mb),
            )
        } else if free_mb < self.min_free_mb.saturating_mul(2) {
            CheckOutcome::warning(self.name(), format!("{detail} (low)"))
        } else {
            CheckOutcome::pass(self.name(), detail)
        })
    }
}

/// Read the running OS version and compare it with the target
pub(crate) async fn read_version(
    remote: &dyn RemoteExecutor,
    host: &Host,
    command: &str,
    target: &str,
) -> VersionCheck {
    match remote.execute(host, command).await {
        Ok(output) if output.success() => {
            let reported = output.stdout.trim();
            if reported.is_empty() {
                VersionCheck::Unknown {
                    reason: "version command printed nothing".into(),
                }
            } else if reported == target {
                VersionCheck::Confirmed {
                    version: reported.to_string(),
                }
            } else {
                VersionCheck::Mismatch {
                    reported: reported.to_string(),
                    expected: target.to_string(),
                }
            }
        }
        Ok(output) => VersionCheck::Unknown {
            reason: output.failure_summary(),
        },
        Err(e) => VersionCheck::Unknown {
            reason: e.to_string(),
        },
    }
}

/// Warns when a host is already on the target or its version is unknown
pub struct CurrentVersionCheck {
    remote: Arc<dyn RemoteExecutor>,
    command: String,
    target: String,
}

impl CurrentVersionCheck {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteExecutor>, command: String, target: &str) -> Self {
        Self {
            remote,
            command,
            target: target.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl HostCheck for CurrentVersionCheck {
    fn name(&self) -> &'static str {
        "current-version"
    }

    async fn run(&self, host: &Host) -> Result<CheckOutcome, CheckError> {
        Ok(
            match read_version(self.remote.as_ref(), host, &self.command, &self.target).await {
                VersionCheck::Confirmed { version } => CheckOutcome::warning(
                    self.name(),
                    format!("already running {version}"),
                ),
                VersionCheck::Mismatch { reported, .. } => {
                    CheckOutcome::pass(self.name(), format!("running {reported}"))
                }
                VersionCheck::Unknown { reason } => {
                    CheckOutcome::warning(self.name(), format!("version unknown: {reason}"))
                }
            },
        )
    }
}

/// Post-upgrade: host reports the target version
pub struct VersionMatchCheck {
    remote: Arc<dyn RemoteExecutor>,
    command: String,
    target: String,
}

impl VersionMatchCheck {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteExecutor>, command: String, target: &str) -> Self {
        Self {
            remote,
            command,
            target: target.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl HostCheck for VersionMatchCheck {
    fn name(&self) -> &'static str {
        "version-match"
    }

    async fn run(&self, host: &Host) -> Result<CheckOutcome, CheckError> {
        Ok(
            match read_version(self.remote.as_ref(), host, &self.command, &self.target).await {
                VersionCheck::Confirmed { version } => {
                    CheckOutcome::pass(self.name(), format!("running {version}"))
                }
                VersionCheck::Mismatch { reported, expected } => CheckOutcome::warning(
                    self.name(),
                    format!("running {reported}, expected {expected}"),
                ),
                VersionCheck::Unknown { reason } => {
                    CheckOutcome::warning(self.name(), format!("version unknown: {reason}"))
                }
            },
        )
    }
}

/// Control-plane health; unhealthy is a warning before the upgrade
pub struct FleetHealthCheck {
    control_plane: Arc<dyn ControlPlane>,
}

impl FleetHealthCheck {
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }
}

#[async_trait::async_trait]
impl FleetCheck for FleetHealthCheck {
    fn name(&self) -> &'static str {
        "fleet-health"
    }

    async fn run(&self) -> Result<CheckOutcome, CheckError> {
        let health = self.control_plane.fleet_health().await?;
        Ok(if health.healthy {
            CheckOutcome::pass(self.name(), health.details)
        } else {
            CheckOutcome::warning(self.name(), format!("fleet unhealthy: {}", health.details))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_core::{CheckStatus, Role};
    use rollout_test_utils::{FakeControlPlane, FakeRemote, Step};

    fn host() -> Host {
        Host::new("worker-01", "10.0.20.1", Role::Worker)
    }

    #[tokio::test]
    async fn disk_space_thresholds() {
        let remote = Arc::new(FakeRemote::new("7.9", "8.10"));
        let check = DiskSpaceCheck::new(remote.clone(), "/var".into(), 4096);

        remote.set_free_disk_mb("worker-01", 1000);
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Blocker);

        remote.set_free_disk_mb("worker-01", 6000);
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Warning);

        remote.set_free_disk_mb("worker-01", 9000);
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn disk_check_errors_on_command_failure() {
        let remote = Arc::new(FakeRemote::new("7.9", "8.10"));
        remote.fail("worker-01", Step::Disk, 1, "df: /var: No such file");
        let check = DiskSpaceCheck::new(remote, "/var".into(), 4096);
        assert!(matches!(
            check.run(&host()).await,
            Err(CheckError::Command { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn current_version_warns_when_already_on_target() {
        let remote = Arc::new(FakeRemote::new("8.10", "8.10"));
        let check = CurrentVersionCheck::new(remote, "version".into(), "8.10");
        let outcome = check.run(&host()).await.unwrap();
        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.detail.contains("already"));
    }

    #[tokio::test]
    async fn version_match_passes_and_warns() {
        let remote = Arc::new(FakeRemote::new("8.10", "8.10"));
        let check = VersionMatchCheck::new(remote.clone(), "version".into(), "8.10");
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Pass);

        let check = VersionMatchCheck::new(remote, "version".into(), "9.4");
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Warning);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_blocker() {
        let remote = Arc::new(FakeRemote::new("7.9", "8.10"));
        remote.set_unreachable("worker-01");
        let check = ReachabilityCheck::new(remote);
        assert_eq!(check.run(&host()).await.unwrap().status, CheckStatus::Blocker);
    }

    #[tokio::test]
    async fn unhealthy_fleet_is_a_warning() {
        let cp = Arc::new(FakeControlPlane::new(["hdfs"]));
        cp.set_health(false, "2 datanodes dead");
        let check = FleetHealthCheck::new(cp);
        let outcome = check.run().await.unwrap();
        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.detail.contains("datanodes"));
    }
}
