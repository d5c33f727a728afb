//! Rollout configuration
//!
//! Loaded from a TOML file where every field is optional; CLI flags are
//! applied on top by the binary. Durations are whole seconds.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete rollout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// OS version every host should end on
    pub target_version: Option<String>,
    /// Restart services this run stopped when the run halts
    pub rollback_enabled: bool,
    /// Durable location for per-host backups (on each host)
    pub backup_root: PathBuf,
    /// Local directory for run reports
    pub report_dir: PathBuf,
    pub batch: BatchConfig,
    pub timeouts: TimeoutConfig,
    pub validation: ValidationConfig,
    pub roles: RoleRules,
    pub upgrade: UpgradeCommands,
    pub services: ServiceConfig,
    pub inventory: InventoryConfig,
    pub control_plane: ControlPlaneConfig,
    pub ssh: SshConfig,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            target_version: None,
            rollback_enabled: false,
            backup_root: PathBuf::from("/var/backups/rollout"),
            report_dir: PathBuf::from("."),
            batch: BatchConfig::default(),
            timeouts: TimeoutConfig::default(),
            validation: ValidationConfig::default(),
            roles: RoleRules::default(),
            upgrade: UpgradeCommands::default(),
            services: ServiceConfig::default(),
            inventory: InventoryConfig::default(),
            control_plane: ControlPlaneConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

impl RolloutConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// With target version
    #[inline]
    #[must_use]
    pub fn with_target_version(mut self, version: impl Into<String>) -> Self {
        self.target_version = Some(version.into());
        self
    }

    /// With a fixed worker batch size
    #[inline]
    #[must_use]
    pub fn with_worker_batch_size(mut self, size: usize) -> Self {
        self.batch.worker_batch_size = Some(size);
        self
    }

    /// Target version, required before `apply`
    pub fn require_target_version(&self) -> Result<&str, ConfigError> {
        match self.target_version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ConfigError::Invalid(
                "target_version is required (config file or --target-version)".into(),
            )),
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.worker_batch_size == Some(0) {
            return Err(ConfigError::Invalid("worker_batch_size must be at least 1".into()));
        }
        if self.batch.redundancy_factor == 0 {
            return Err(ConfigError::Invalid("redundancy_factor must be at least 1".into()));
        }
        if self.validation.parallelism == 0 {
            return Err(ConfigError::Invalid("validation.parallelism must be at least 1".into()));
        }
        if self.timeouts.reboot_poll_interval_secs == 0 || self.timeouts.service_poll_interval_secs == 0
        {
            return Err(ConfigError::Invalid("poll intervals must be at least 1s".into()));
        }
        if let Some(order) = &self.services.order {
            let unique: BTreeSet<_> = order.iter().collect();
            if unique.len() != order.len() {
                return Err(ConfigError::Invalid("services.order lists a service twice".into()));
            }
        }
        Ok(())
    }
}

/// Batching and failure policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Fixed worker batch size; derived from fleet size when unset
    pub worker_batch_size: Option<usize>,
    /// Workers per batch = worker count / redundancy factor, clamped to [2, 10]
    pub redundancy_factor: usize,
    /// Settle time between worker batches
    pub cooldown_secs: u64,
    /// Keep launching batches after a host failure
    pub continue_on_host_failure: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_batch_size: None,
            redundancy_factor: 3,
            cooldown_secs: 30,
            continue_on_host_failure: false,
        }
    }
}

impl BatchConfig {
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Per-step time bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub reboot_timeout_secs: u64,
    pub reboot_poll_interval_secs: u64,
    pub service_timeout_secs: u64,
    pub service_poll_interval_secs: u64,
    pub check_timeout_secs: u64,
    /// Bound on a single long-running remote command (upgrade execution)
    pub command_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reboot_timeout_secs: 2 * 60 * 60,
            reboot_poll_interval_secs: 15,
            service_timeout_secs: 10 * 60,
            service_poll_interval_secs: 5,
            check_timeout_secs: 60,
            command_timeout_secs: 3 * 60 * 60,
        }
    }
}

impl TimeoutConfig {
    #[inline]
    #[must_use]
    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn reboot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.reboot_poll_interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn service_poll_interval(&self) -> Duration {
        Duration::from_secs(self.service_poll_interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Validation battery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Hosts validated concurrently
    pub parallelism: usize,
    /// Filesystem the upgrade writes to
    pub disk_path: String,
    /// Below this much free space the host is blocked; below twice this it warns
    pub min_free_disk_mb: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            parallelism: 32,
            disk_path: "/var".into(),
            min_free_disk_mb: 4096,
        }
    }
}

/// Service names that decide a discovered host's role
///
/// Precedence is master, then worker, then edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleRules {
    pub master_services: BTreeSet<String>,
    pub worker_services: BTreeSet<String>,
}

impl Default for RoleRules {
    fn default() -> Self {
        let set = |names: &[&str]| names.iter().map(|s| (*s).to_string()).collect();
        Self {
            master_services: set(&[
                "NAMENODE",
                "SECONDARYNAMENODE",
                "JOURNALNODE",
                "ZOOKEEPER_SERVER",
                "RESOURCEMANAGER",
                "HBASE_MASTER",
                "HIVEMETASTORE",
                "CATALOGSERVER",
                "STATESTORE",
                "KUDU_MASTER",
            ]),
            worker_services: set(&[
                "DATANODE",
                "NODEMANAGER",
                "REGIONSERVER",
                "IMPALAD",
                "KUDU_TSERVER",
                "SOLR_SERVER",
                "KAFKA_BROKER",
            ]),
        }
    }
}

impl RoleRules {
    /// Role for a set of service names (master > worker > edge)
    #[must_use]
    pub fn classify<'a, I>(&self, services: I) -> Role
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        let runs_any = |set: &BTreeSet<String>| {
            services
                .clone()
                .into_iter()
                .any(|s| set.contains(&s.to_ascii_uppercase()))
        };
        if runs_any(&self.master_services) {
            Role::Master
        } else if runs_any(&self.worker_services) {
            Role::Worker
        } else {
            Role::Edge
        }
    }
}

/// Command templates for the OS upgrade utility and host bookkeeping
///
/// Placeholders: `{target}`, `{backup_dir}`, `{hostname}`, `{session}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeCommands {
    pub backup: String,
    pub install: String,
    /// Dry-run assessment; prints a JSON report on stdout
    pub assess: String,
    /// One-shot cleanup of known-problematic artifacts
    pub remediate: String,
    pub execute: String,
    pub reboot: String,
    /// Prints the running OS version on stdout
    pub version: String,
}

impl Default for UpgradeCommands {
    fn default() -> Self {
        Self {
            backup: "mkdir -p {backup_dir} && tar -czf {backup_dir}/etc.tar.gz -C / etc \
                     && rpm -qa | sort > {backup_dir}/packages.txt"
                .into(),
            install: "rpm -q leapp-upgrade || dnf install -y leapp-upgrade".into(),
            assess: "leapp preupgrade --target {target} >/dev/null 2>&1; \
                     cat /var/log/leapp/leapp-report.json"
                .into(),
            remediate: "dnf remove -y --oldinstallonly --setopt installonly_limit=2; \
                        dnf clean all; rm -rf /var/lib/leapp/scratch"
                .into(),
            execute: "leapp upgrade --target {target}".into(),
            reboot: "systemctl reboot".into(),
            version: ". /etc/os-release && echo $VERSION_ID".into(),
        }
    }
}

/// Substitute `{name}` placeholders in a command template
#[must_use]
pub fn render_command(template: &str, vars: &BTreeMap<&str, String>) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Service topology override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Explicit stop order; when unset the control plane's order is used
    pub order: Option<Vec<String>>,
}

/// Statically declared host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticHost {
    pub hostname: String,
    /// Defaults to the hostname
    #[serde(default)]
    pub address: Option<String>,
    /// When unset the role is classified from `services`
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub services: BTreeSet<String>,
}

/// Inventory source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Static host list; empty means discover through the control plane
    pub hosts: Vec<StaticHost>,
}

/// Control-plane endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub cluster: String,
    pub request_timeout_secs: u64,
    pub accept_invalid_certs: bool,
    pub retry: RetryPolicy,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7180/api/v1".into(),
            cluster: "cluster".into(),
            request_timeout_secs: 30,
            accept_invalid_certs: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl ControlPlaneConfig {
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// SSH transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options passed verbatim
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".into(),
            port: 22,
            connect_timeout_secs: 10,
            identity_file: None,
            options: Vec::new(),
        }
    }
}

impl SshConfig {
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
