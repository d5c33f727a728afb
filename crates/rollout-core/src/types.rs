//! Core types for Rollout
//!
//! Defines the data model shared by every component:
//! - Hosts and the role that decides their concurrency policy
//! - The per-host upgrade state machine value and its outcome
//! - Validation check outcomes and the fleet aggregate
//! - Service topology (stop order, reversed for start)
//! - The upgrade session snapshot persisted in the run report

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ParseRoleError;

/// Host role, resolved once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// No data-bearing service; safe to upgrade all at once
    Edge,
    /// Storage / compute execution; upgraded in bounded batches
    Worker,
    /// Coordination / metadata; upgraded strictly one at a time
    Master,
}

impl Role {
    /// All roles in upgrade order
    pub const ALL: [Role; 3] = [Role::Edge, Role::Worker, Role::Master];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Edge => "edge",
            Role::Worker => "worker",
            Role::Master => "master",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(Role::Edge),
            "worker" => Ok(Role::Worker),
            "master" => Ok(Role::Master),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// A host taking part in the upgrade
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// Unique hostname (the key everywhere else)
    pub hostname: String,
    /// Address used by the remote execution channel
    pub address: String,
    /// Resolved role
    pub role: Role,
    /// Services the control plane reported on this host
    #[serde(default)]
    pub discovered_services: BTreeSet<String>,
}

impl Host {
    /// Create a host with no discovered services
    #[inline]
    #[must_use]
    pub fn new(hostname: impl Into<String>, address: impl Into<String>, role: Role) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            role,
            discovered_services: BTreeSet::new(),
        }
    }

    /// With discovered services
    #[inline]
    #[must_use]
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discovered_services = services.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.role)
    }
}

/// Per-host upgrade state
///
/// Transitions only move forward; `Failed` is reachable from every
/// non-terminal state. See `rollout_kernel::state_machine` for the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostUpgradeState {
    /// Not yet launched
    Pending,
    /// Capturing host-local state
    BackingUp,
    /// Installing the upgrade utility and running its assessment
    Preparing,
    /// Upgrade command running
    Upgrading,
    /// Waiting for the host to drop off and come back
    Rebooting,
    /// Reading back the running OS version
    Verifying,
    Succeeded,
    /// Terminal; reached from any non-terminal state
    Failed,
}

impl HostUpgradeState {
    /// States in forward order (excluding `Failed`)
    pub const FORWARD: [HostUpgradeState; 7] = [
        HostUpgradeState::Pending,
        HostUpgradeState::BackingUp,
        HostUpgradeState::Preparing,
        HostUpgradeState::Upgrading,
        HostUpgradeState::Rebooting,
        HostUpgradeState::Verifying,
        HostUpgradeState::Succeeded,
    ];

    /// No further transition possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostUpgradeState::Succeeded | HostUpgradeState::Failed)
    }

    /// Host work has started (anything past `Pending`)
    #[inline]
    #[must_use]
    pub fn is_touched(&self) -> bool {
        !matches!(self, HostUpgradeState::Pending)
    }

    /// Kebab-case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HostUpgradeState::Pending => "pending",
            HostUpgradeState::BackingUp => "backing-up",
            HostUpgradeState::Preparing => "preparing",
            HostUpgradeState::Upgrading => "upgrading",
            HostUpgradeState::Rebooting => "rebooting",
            HostUpgradeState::Verifying => "verifying",
            HostUpgradeState::Succeeded => "succeeded",
            HostUpgradeState::Failed => "failed",
        }
    }
}

impl fmt::Display for HostUpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step a host failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostErrorKind {
    /// Capturing host-local state failed
    Backup,
    /// Upgrade utility install or assessment failed
    Prepare,
    /// The upgrade itself failed
    Upgrade,
    /// Host did not come back within the reboot bound
    RebootTimeout,
}

impl HostErrorKind {
    /// Kebab-case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HostErrorKind::Backup => "backup",
            HostErrorKind::Prepare => "prepare",
            HostErrorKind::Upgrade => "upgrade",
            HostErrorKind::RebootTimeout => "reboot-timeout",
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure attached to a host's terminal `Failed` state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    pub kind: HostErrorKind,
    /// State the host was in when it failed
    pub failed_in: HostUpgradeState,
    pub message: String,
}

/// Result of comparing the reported OS version with the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum VersionCheck {
    /// Host reports the target version
    Confirmed { version: String },
    /// Host came back on some other version
    Mismatch { reported: String, expected: String },
    /// Version could not be read
    Unknown { reason: String },
}

impl VersionCheck {
    /// Mismatch and unknown both surface as warnings
    #[inline]
    #[must_use]
    pub fn is_warning(&self) -> bool {
        !matches!(self, VersionCheck::Confirmed { .. })
    }
}

/// Everything known about one host at the end (or middle) of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub role: Role,
    pub state: HostUpgradeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<HostFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_check: Option<VersionCheck>,
    /// True when the one self-remediation pass ran
    #[serde(default)]
    pub remediated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl HostOutcome {
    /// Untouched host
    #[inline]
    #[must_use]
    pub fn pending(role: Role) -> Self {
        Self {
            role,
            state: HostUpgradeState::Pending,
            failure: None,
            version_check: None,
            remediated: false,
            warnings: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.state == HostUpgradeState::Succeeded
    }

    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == HostUpgradeState::Failed
    }

    /// Failed because the reboot wait ran out
    #[inline]
    #[must_use]
    pub fn is_reboot_timeout(&self) -> bool {
        matches!(
            self.failure,
            Some(HostFailure {
                kind: HostErrorKind::RebootTimeout,
                ..
            })
        )
    }
}

/// Validation status lattice: `Pass < Warning < Blocker`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    #[default]
    Pass,
    /// Reported, never gates a phase
    Warning,
    /// Halts the run before the next mutating phase
    Blocker,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warning => "warning",
            CheckStatus::Blocker => "blocker",
        })
    }
}

/// One check against one host (or the fleet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check_name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckOutcome {
    #[inline]
    #[must_use]
    pub fn new(check_name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            status,
            detail: detail.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn pass(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Pass, detail)
    }

    #[inline]
    #[must_use]
    pub fn warning(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Warning, detail)
    }

    #[inline]
    #[must_use]
    pub fn blocker(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, CheckStatus::Blocker, detail)
    }
}

/// All check outcomes for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostValidation {
    pub hostname: String,
    pub checks: Vec<CheckOutcome>,
}

impl HostValidation {
    /// Worst status among this host's checks
    #[must_use]
    pub fn status(&self) -> CheckStatus {
        self.checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or_default()
    }
}

/// When a validation battery ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    /// Before any host is touched
    Pre,
    /// After every role has been upgraded
    Post,
}

/// Fleet-wide validation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub kind: ValidationKind,
    pub hosts: Vec<HostValidation>,
    /// Checks that concern the fleet as a whole (control-plane health)
    #[serde(default)]
    pub fleet_checks: Vec<CheckOutcome>,
    pub generated_at: DateTime<Utc>,
}

impl ValidationReport {
    /// Empty report
    #[must_use]
    pub fn new(kind: ValidationKind) -> Self {
        Self {
            kind,
            hosts: Vec::new(),
            fleet_checks: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Fleet aggregate over the `Pass < Warning < Blocker` lattice
    #[must_use]
    pub fn aggregate(&self) -> CheckStatus {
        self.hosts
            .iter()
            .flat_map(|h| h.checks.iter())
            .chain(self.fleet_checks.iter())
            .map(|c| c.status)
            .max()
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.aggregate() == CheckStatus::Blocker
    }

    /// `(hostname, check)` pairs with the given status; fleet checks use `"<fleet>"`
    #[must_use]
    pub fn with_status(&self, status: CheckStatus) -> Vec<(&str, &CheckOutcome)> {
        let per_host = self.hosts.iter().flat_map(|h| {
            h.checks
                .iter()
                .filter(move |c| c.status == status)
                .map(move |c| (h.hostname.as_str(), c))
        });
        let fleet = self
            .fleet_checks
            .iter()
            .filter(move |c| c.status == status)
            .map(|c| ("<fleet>", c));
        per_host.chain(fleet).collect()
    }

    /// Validation result for a single host
    #[must_use]
    pub fn host(&self, hostname: &str) -> Option<&HostValidation> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }
}

/// Services in stop order; start order is the exact reverse
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceTopology(Vec<String>);

impl ServiceTopology {
    #[inline]
    #[must_use]
    pub fn new(stop_order: Vec<String>) -> Self {
        Self(stop_order)
    }

    /// Declared (stop) order
    #[inline]
    #[must_use]
    pub fn stop_order(&self) -> &[String] {
        &self.0
    }

    /// Reverse of the stop order
    #[must_use]
    pub fn start_order(&self) -> Vec<String> {
        self.0.iter().rev().cloned().collect()
    }

    /// Topology with the order reversed
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(self.start_order())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseName {
    /// Fleet and host checks before anything changes
    PreValidation,
    /// Stop cluster services in topology order
    ServiceStop,
    /// Upgrade every edge host at once
    EdgeUpgrade,
    /// Upgrade workers in bounded batches
    WorkerUpgrade,
    /// Upgrade masters one at a time
    MasterUpgrade,
    /// Re-run the checks against the upgraded fleet
    PostValidation,
    /// Start services in reverse stop order
    ServiceStart,
    /// Summarize and persist the session
    FinalReport,
}

impl PhaseName {
    /// The standard pipeline order
    pub const ALL: [PhaseName; 8] = [
        PhaseName::PreValidation,
        PhaseName::ServiceStop,
        PhaseName::EdgeUpgrade,
        PhaseName::WorkerUpgrade,
        PhaseName::MasterUpgrade,
        PhaseName::PostValidation,
        PhaseName::ServiceStart,
        PhaseName::FinalReport,
    ];

    /// Phases that change cluster or host state
    #[inline]
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            PhaseName::ServiceStop
                | PhaseName::EdgeUpgrade
                | PhaseName::WorkerUpgrade
                | PhaseName::MasterUpgrade
                | PhaseName::ServiceStart
        )
    }

    /// Role upgraded by this phase, if it is an upgrade phase
    #[inline]
    #[must_use]
    pub fn upgrade_role(&self) -> Option<Role> {
        match self {
            PhaseName::EdgeUpgrade => Some(Role::Edge),
            PhaseName::WorkerUpgrade => Some(Role::Worker),
            PhaseName::MasterUpgrade => Some(Role::Master),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::PreValidation => "pre-validation",
            PhaseName::ServiceStop => "service-stop",
            PhaseName::EdgeUpgrade => "edge-upgrade",
            PhaseName::WorkerUpgrade => "worker-upgrade",
            PhaseName::MasterUpgrade => "master-upgrade",
            PhaseName::PostValidation => "post-validation",
            PhaseName::ServiceStart => "service-start",
            PhaseName::FinalReport => "final-report",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// Not started
    Pending,
    Running,
    Succeeded,
    /// Host subset was empty
    Skipped,
    /// Halted the run
    Failed,
}

impl PhaseStatus {
    /// Satisfies a `depends_on` edge
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, PhaseStatus::Succeeded | PhaseStatus::Skipped)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: PhaseName,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PhaseRecord {
    #[inline]
    #[must_use]
    pub fn pending(name: PhaseName) -> Self {
        Self {
            name,
            status: PhaseStatus::Pending,
            started_at: None,
            finished_at: None,
            detail: None,
        }
    }
}

/// Overall session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    /// Every phase finished
    Completed,
    /// Stopped on the first failure or an abort
    Halted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Halted => "halted",
        })
    }
}

/// Snapshot of one upgrade run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeSession {
    pub session_id: Uuid,
    pub target_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub backup_root: PathBuf,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_in: Option<PhaseName>,
    /// Keyed by hostname, in inventory order
    pub per_host_outcome: IndexMap<String, HostOutcome>,
    pub phases: Vec<PhaseRecord>,
    /// Services this run stopped, in the order they were stopped
    #[serde(default)]
    pub service_stop_order: Vec<String>,
    /// Services this run started, in the order they were started
    #[serde(default)]
    pub service_start_order: Vec<String>,
}

impl UpgradeSession {
    /// Hostnames currently in `state`, inventory order
    #[must_use]
    pub fn hosts_in(&self, state: HostUpgradeState) -> Vec<&str> {
        self.per_host_outcome
            .iter()
            .filter(|(_, o)| o.state == state)
            .map(|(h, _)| h.as_str())
            .collect()
    }

    /// Hosts that finished the upgrade
    #[must_use]
    pub fn succeeded_hosts(&self) -> Vec<&str> {
        self.hosts_in(HostUpgradeState::Succeeded)
    }

    /// Hosts that reached `Failed`
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts_in(HostUpgradeState::Failed)
    }

    /// Hosts no upgrade work ever touched
    #[must_use]
    pub fn never_attempted(&self) -> Vec<&str> {
        self.hosts_in(HostUpgradeState::Pending)
    }

    /// Phase record by name
    #[must_use]
    pub fn phase(&self, name: PhaseName) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Phases that succeeded, in execution order
    #[must_use]
    pub fn executed_phases(&self) -> Vec<PhaseName> {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Succeeded)
            .map(|p| p.name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_and_display() {
        assert_eq!("Master".parse::<Role>().unwrap(), Role::Master);
        assert_eq!(" worker ".parse::<Role>().unwrap(), Role::Worker);
        assert!("gateway".parse::<Role>().is_err());
        assert_eq!(Role::Edge.to_string(), "edge");
    }

    #[test]
    fn check_status_lattice_order() {
        assert!(CheckStatus::Pass < CheckStatus::Warning);
        assert!(CheckStatus::Warning < CheckStatus::Blocker);
    }

    #[test]
    fn empty_report_passes() {
        let report = ValidationReport::new(ValidationKind::Pre);
        assert_eq!(report.aggregate(), CheckStatus::Pass);
    }

    #[test]
    fn fleet_check_participates_in_aggregate() {
        let mut report = ValidationReport::new(ValidationKind::Pre);
        report.hosts.push(HostValidation {
            hostname: "a".into(),
            checks: vec![CheckOutcome::pass("reachability", "ok")],
        });
        report
            .fleet_checks
            .push(CheckOutcome::warning("fleet-health", "degraded"));
        assert_eq!(report.aggregate(), CheckStatus::Warning);
        assert_eq!(report.with_status(CheckStatus::Warning)[0].0, "<fleet>");
    }

    #[test]
    fn topology_start_is_reverse_of_stop() {
        let topology = ServiceTopology::new(vec!["impala".into(), "hive".into(), "hdfs".into()]);
        assert_eq!(topology.start_order(), vec!["hdfs", "hive", "impala"]);
        assert_eq!(topology.reversed().reversed(), topology);
    }

    #[test]
    fn host_state_terminality() {
        assert!(HostUpgradeState::Succeeded.is_terminal());
        assert!(HostUpgradeState::Failed.is_terminal());
        assert!(!HostUpgradeState::Rebooting.is_terminal());
        assert!(!HostUpgradeState::Pending.is_touched());
    }

    #[test]
    fn host_state_serializes_kebab_case() {
        let json = serde_json::to_string(&HostUpgradeState::BackingUp).unwrap();
        assert_eq!(json, "\"backing-up\"");
    }

    #[test]
    fn mutating_phases() {
        let mutating: Vec<_> = PhaseName::ALL.iter().filter(|p| p.is_mutating()).collect();
        assert_eq!(mutating.len(), 5);
        assert!(!PhaseName::PreValidation.is_mutating());
        assert!(!PhaseName::FinalReport.is_mutating());
    }
}
