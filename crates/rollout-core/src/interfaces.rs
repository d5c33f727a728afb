//! Collaborator contracts
//!
//! The kernel never talks to the network directly. It consumes these two
//! traits, implemented over HTTP/SSH in `rollout-connect` and in memory in
//! `rollout-test-utils`.

use crate::error::{ControlPlaneError, RemoteError};
use crate::types::Host;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Host entry as listed by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    #[serde(default)]
    pub address: Option<String>,
    /// Service role names assigned to this host
    #[serde(default)]
    pub services: BTreeSet<String>,
}

/// Service state as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Started,
    Starting,
    Stopping,
    Stopped,
    /// Not running and will not start (e.g. disabled)
    Down,
    Unknown,
}

impl ServiceState {
    /// Quiesced: safe to touch the hosts underneath
    #[inline]
    #[must_use]
    pub fn is_quiesced(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Down)
    }

    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Started)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServiceState::Started => "started",
            ServiceState::Starting => "starting",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Down => "down",
            ServiceState::Unknown => "unknown",
        })
    }
}

/// Cluster-wide health summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetHealth {
    pub healthy: bool,
    #[serde(default)]
    pub details: String,
}

/// Cluster-management control plane
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// All hosts with their assigned services
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, ControlPlaneError>;

    /// Cluster services in dependency (stop) order
    async fn list_cluster_services(&self) -> Result<Vec<String>, ControlPlaneError>;

    /// Issue a stop command
    async fn stop_service(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// Issue a start command
    async fn start_service(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// Current state of one service
    async fn service_state(&self, name: &str) -> Result<ServiceState, ControlPlaneError>;

    /// Fleet-wide health
    async fn fleet_health(&self) -> Result<FleetHealth, ControlPlaneError>;
}

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Exit code zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Successful output with the given stdout
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given code and stderr
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Last non-empty stderr line, or the exit code when stderr is empty
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map_or_else(|| format!("exit code {}", self.exit_code), ToString::to_string)
    }
}

/// Remote command execution channel
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the host
    async fn execute(&self, host: &Host, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Whether the host currently accepts connections
    async fn is_reachable(&self, host: &Host) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_prefers_last_stderr_line() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "warning: x\nerror: disk full\n\n".into(),
        };
        assert_eq!(out.failure_summary(), "error: disk full");
        assert_eq!(CommandOutput::failed(7, "").failure_summary(), "exit code 7");
    }

    #[test]
    fn quiesced_states() {
        assert!(ServiceState::Stopped.is_quiesced());
        assert!(ServiceState::Down.is_quiesced());
        assert!(!ServiceState::Stopping.is_quiesced());
    }

    #[test]
    fn host_record_defaults() {
        let rec: HostRecord = serde_json::from_str(r#"{"hostname":"n1"}"#).unwrap();
        assert!(rec.address.is_none());
        assert!(rec.services.is_empty());
    }
}
