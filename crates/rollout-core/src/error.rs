//! Error types for Rollout
//!
//! Provides the error taxonomy for:
//! - Inventory discovery (fatal, no partial run)
//! - Control-plane and remote-channel calls (transient vs. fatal)
//! - Service lifecycle (carries the services already transitioned)
//! - Per-host upgrade failures (contained to the host)
//! - Plan construction
//! - Run halts surfaced to the operator

use crate::types::{HostErrorKind, HostFailure, HostUpgradeState, PhaseName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Top-level reason a run stopped before completing
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// Inventory could not be resolved
    #[error("discovery failed: {0}")]
    Discovery(#[from] InventoryError),

    /// Validation reported at least one blocker
    #[error("validation blocked {phase}: {blockers} blocker(s) found")]
    ValidationBlocker { phase: PhaseName, blockers: usize },

    /// Service stop/start failed
    #[error("service lifecycle failed: {0}")]
    ServiceLifecycle(#[from] ServiceLifecycleError),

    /// One or more hosts failed inside an upgrade phase
    #[error("{phase} halted: {} host(s) failed ({})", .failed.len(), .failed.join(", "))]
    HostUpgrade { phase: PhaseName, failed: Vec<String> },

    /// One or more hosts did not come back from reboot
    #[error("{phase} halted: {} host(s) did not return from reboot ({})", .hosts.len(), .hosts.join(", "))]
    RebootTimeout { phase: PhaseName, hosts: Vec<String> },

    /// Operator requested abort
    #[error("aborted by operator during {phase}")]
    Aborted { phase: PhaseName },

    /// Plan is malformed
    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    /// Configuration problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RolloutError {
    /// Serializable classification
    #[must_use]
    pub fn kind(&self) -> HaltKind {
        match self {
            Self::Discovery(_) => HaltKind::Discovery,
            Self::ValidationBlocker { .. } => HaltKind::ValidationBlocker,
            Self::ServiceLifecycle(e) if e.is_timeout() => HaltKind::ServiceTimeout,
            Self::ServiceLifecycle(_) => HaltKind::ServiceLifecycle,
            Self::HostUpgrade { .. } => HaltKind::HostUpgrade,
            Self::RebootTimeout { .. } => HaltKind::RebootTimeout,
            Self::Aborted { .. } => HaltKind::Aborted,
            Self::Plan(_) | Self::Config(_) => HaltKind::Config,
        }
    }

    /// Safe to re-run later without manual intervention
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ValidationBlocker { .. } | Self::Aborted { .. } | Self::Discovery(_)
        )
    }

    /// Needs a human to inspect hosts or services before anything else runs
    #[inline]
    #[must_use]
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Self::ServiceLifecycle(_) | Self::HostUpgrade { .. } | Self::RebootTimeout { .. }
        )
    }

    /// Process exit code for this halt
    #[inline]
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

/// Halt classification carried in the persisted report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaltKind {
    Discovery,
    ValidationBlocker,
    ServiceLifecycle,
    ServiceTimeout,
    HostUpgrade,
    RebootTimeout,
    Aborted,
    Config,
}

impl HaltKind {
    /// Exit code: 2 blocker, 3 failure, 4 timeout, 5 discovery/config, 6 abort
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            HaltKind::ValidationBlocker => 2,
            HaltKind::ServiceLifecycle | HaltKind::HostUpgrade => 3,
            HaltKind::ServiceTimeout | HaltKind::RebootTimeout => 4,
            HaltKind::Discovery | HaltKind::Config => 5,
            HaltKind::Aborted => 6,
        }
    }
}

impl fmt::Display for HaltKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HaltKind::Discovery => "discovery",
            HaltKind::ValidationBlocker => "validation-blocker",
            HaltKind::ServiceLifecycle => "service-lifecycle",
            HaltKind::ServiceTimeout => "service-timeout",
            HaltKind::HostUpgrade => "host-upgrade",
            HaltKind::RebootTimeout => "reboot-timeout",
            HaltKind::Aborted => "aborted",
            HaltKind::Config => "config",
        })
    }
}

/// Unknown role string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}' (expected master, worker or edge)")]
pub struct ParseRoleError(pub String);

/// Host inventory errors
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// Control plane could not be queried
    #[error("control plane unavailable: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// Same hostname listed twice
    #[error("duplicate host: {0}")]
    DuplicateHost(String),

    /// Host entry is unusable
    #[error("invalid host '{hostname}': {reason}")]
    InvalidHost { hostname: String, reason: String },

    /// Nothing to upgrade
    #[error("inventory resolved to zero hosts")]
    Empty,
}

/// Control-plane call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneError {
    /// Network-level failure (connect, reset, DNS)
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-success HTTP status
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Credentials rejected
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Referenced object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Response could not be understood
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ControlPlaneError {
    /// Worth retrying with backoff
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            Self::Auth(_) | Self::NotFound(_) | Self::Protocol(_) => false,
        }
    }

    /// Authentication failure (never retried)
    #[inline]
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Remote execution channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Could not reach the host
    #[error("cannot connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    /// Local transport process failed to start
    #[error("failed to spawn remote transport: {0}")]
    Spawn(String),

    /// Command exceeded its time bound
    #[error("command on {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Direction of a service lifecycle pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleDirection {
    Stop,
    Start,
}

impl fmt::Display for LifecycleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleDirection::Stop => "stop",
            LifecycleDirection::Start => "start",
        })
    }
}

/// Service lifecycle errors
///
/// Every variant carries the services already transitioned in this
/// direction, which the failure handler reports and (optionally) restores.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceLifecycleError {
    /// Could not read the service topology
    #[error("cannot read service topology: {0}")]
    Topology(ControlPlaneError),

    /// Service did not reach the target state in time
    #[error("{service} did not {direction} within {waited_secs}s")]
    Timeout {
        service: String,
        direction: LifecycleDirection,
        waited_secs: u64,
        transitioned: Vec<String>,
    },

    /// Control plane rejected or failed a call
    #[error("{direction} {service} failed: {source}")]
    ControlPlane {
        service: String,
        direction: LifecycleDirection,
        #[source]
        source: ControlPlaneError,
        transitioned: Vec<String>,
    },

    /// Every service started but the fleet never reported healthy
    #[error("fleet unhealthy after start: {details}")]
    FleetUnhealthy {
        details: String,
        transitioned: Vec<String>,
    },
}

impl ServiceLifecycleError {
    /// Services successfully transitioned before the failure
    #[must_use]
    pub fn transitioned(&self) -> &[String] {
        match self {
            Self::Topology(_) => &[],
            Self::Timeout { transitioned, .. }
            | Self::ControlPlane { transitioned, .. }
            | Self::FleetUnhealthy { transitioned, .. } => transitioned,
        }
    }

    /// Service that failed, if a single one did
    #[must_use]
    pub fn failed_service(&self) -> Option<&str> {
        match self {
            Self::Timeout { service, .. } | Self::ControlPlane { service, .. } => Some(service),
            Self::Topology(_) | Self::FleetUnhealthy { .. } => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::FleetUnhealthy { .. })
    }
}

/// Per-host upgrade failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failed during {state}: {message}")]
pub struct HostUpgradeError {
    pub kind: HostErrorKind,
    pub state: HostUpgradeState,
    pub message: String,
}

impl HostUpgradeError {
    #[inline]
    #[must_use]
    pub fn new(kind: HostErrorKind, state: HostUpgradeState, message: impl Into<String>) -> Self {
        Self {
            kind,
            state,
            message: message.into(),
        }
    }

    /// Reboot bound exceeded; host may still be mid-upgrade
    #[inline]
    #[must_use]
    pub fn is_reboot_timeout(&self) -> bool {
        self.kind == HostErrorKind::RebootTimeout
    }
}

impl From<HostUpgradeError> for HostFailure {
    fn from(e: HostUpgradeError) -> Self {
        HostFailure {
            kind: e.kind,
            failed_in: e.state,
            message: e.message,
        }
    }
}

/// Plan construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Phase listed twice
    #[error("duplicate phase: {0}")]
    DuplicatePhase(PhaseName),

    /// Phase depends on itself
    #[error("phase {0} depends on itself")]
    SelfDependency(PhaseName),

    /// Dependency is not part of the plan
    #[error("phase {phase} depends on {missing}, which is not in the plan")]
    UnknownDependency { phase: PhaseName, missing: PhaseName },

    /// Dependency graph has a cycle
    #[error("phase dependencies form a cycle")]
    CycleDetected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_error_classification() {
        assert!(ControlPlaneError::Unreachable("reset".into()).is_transient());
        assert!(ControlPlaneError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!ControlPlaneError::Server {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!ControlPlaneError::Auth("401".into()).is_transient());
        assert!(ControlPlaneError::Auth("401".into()).is_auth());
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let blocker = RolloutError::ValidationBlocker {
            phase: PhaseName::ServiceStop,
            blockers: 1,
        };
        let failure = RolloutError::HostUpgrade {
            phase: PhaseName::WorkerUpgrade,
            failed: vec!["w1".into()],
        };
        let timeout = RolloutError::RebootTimeout {
            phase: PhaseName::MasterUpgrade,
            hosts: vec!["m1".into()],
        };
        assert_eq!(blocker.exit_code(), 2);
        assert_eq!(failure.exit_code(), 3);
        assert_eq!(timeout.exit_code(), 4);
    }

    #[test]
    fn service_timeout_maps_to_timeout_kind() {
        let err = RolloutError::ServiceLifecycle(ServiceLifecycleError::Timeout {
            service: "hdfs".into(),
            direction: LifecycleDirection::Stop,
            waited_secs: 600,
            transitioned: vec!["impala".into()],
        });
        assert_eq!(err.kind(), HaltKind::ServiceTimeout);
        assert!(err.requires_operator());
    }

    #[test]
    fn host_upgrade_error_display() {
        let err = HostUpgradeError::new(
            HostErrorKind::Upgrade,
            HostUpgradeState::Upgrading,
            "exit 1",
        );
        assert_eq!(err.to_string(), "upgrade failed during upgrading: exit 1");
        let failure: HostFailure = err.into();
        assert_eq!(failure.failed_in, HostUpgradeState::Upgrading);
    }

    #[test]
    fn lifecycle_error_reports_transitioned() {
        let err = ServiceLifecycleError::ControlPlane {
            service: "hive".into(),
            direction: LifecycleDirection::Start,
            source: ControlPlaneError::Auth("denied".into()),
            transitioned: vec!["hdfs".into()],
        };
        assert_eq!(err.transitioned(), ["hdfs".to_string()]);
        assert_eq!(err.failed_service(), Some("hive"));
        assert!(!err.is_timeout());
    }
}
