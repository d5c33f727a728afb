//! Rollout Core - shared model for rolling fleet upgrades
//!
//! Everything the orchestration kernel and its collaborators agree on:
//! - Hosts, roles and the per-host upgrade state
//! - Validation outcomes and the fleet-level aggregate
//! - Service topology and the upgrade session snapshot
//! - Configuration loaded from TOML
//! - Contracts for the control plane and the remote execution channel
//! - The error taxonomy and bounded retry policy
//!
//! # Example
//!
//! ```rust,ignore
//! use rollout_core::{RolloutConfig, ServiceTopology};
//!
//! let config = RolloutConfig::from_toml_str(r#"target_version = "8.10""#)?;
//! let topology = ServiceTopology::new(vec!["impala".into(), "hdfs".into()]);
//! assert_eq!(topology.start_order(), vec!["hdfs", "impala"]);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod config;
pub mod error;
pub mod interfaces;
pub mod retry;
pub mod types;

// Re-exports for convenience
pub use config::{
    render_command, BatchConfig, ControlPlaneConfig, InventoryConfig, RoleRules, RolloutConfig,
    ServiceConfig, SshConfig, StaticHost, TimeoutConfig, UpgradeCommands, ValidationConfig,
};
pub use error::{
    ConfigError, ControlPlaneError, HaltKind, HostUpgradeError, InventoryError, LifecycleDirection,
    ParseRoleError, PlanError, RemoteError, RolloutError, ServiceLifecycleError,
};
pub use interfaces::{
    CommandOutput, ControlPlane, FleetHealth, HostRecord, RemoteExecutor, ServiceState,
};
pub use retry::{retry_transient, RetryPolicy};
pub use types::{
    CheckOutcome, CheckStatus, Host, HostErrorKind, HostFailure, HostOutcome, HostUpgradeState,
    HostValidation, PhaseName, PhaseRecord, PhaseStatus, Role, ServiceTopology, SessionStatus,
    UpgradeSession, ValidationKind, ValidationReport, VersionCheck,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Rollout Core
    pub use crate::{
        CheckStatus, ControlPlane, Host, HostOutcome, HostUpgradeState, PhaseName, RemoteExecutor,
        Role, RolloutConfig, RolloutError, ServiceTopology, UpgradeSession, ValidationReport,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
