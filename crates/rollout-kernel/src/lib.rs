//! Rollout Kernel (rollout-kernel)
//!
//! Engine for rolling OS upgrades across a role-partitioned fleet:
//! 1. **Inventory**: resolve hosts and give each exactly one role
//! 2. **Validation**: pre- and post-upgrade checks reduced to one verdict
//! 3. **Execution**: stop services, upgrade edge, worker and master hosts in
//!    batches, start services in reverse, report
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rollout_kernel::prelude::*;
//!
//! let config = RolloutConfig::load(Path::new("rollout.toml"))?.with_target_version("8.10");
//! let orchestrator = Orchestrator::new(config, control_plane, remote);
//!
//! let preview = orchestrator.plan().await?;
//! println!("{preview}");
//!
//! let report = orchestrator.apply().await?;
//! report.write(Path::new("reports"))?;
//! std::process::exit(report.exit_code);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod abort;
pub mod audit;
pub mod dag;
pub mod error;
pub mod failure;
pub mod inventory;
pub mod node;
pub mod orchestrator;
pub mod outcome;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod services;
pub mod state_machine;
pub mod validation;

// Re-exports
pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use audit::{AuditEvent, AuditLog};
pub use error::{AuditError, CheckError, IllegalTransition, ReportError};
pub use failure::{FailedHost, FailureHandler, FailureReport};
pub use inventory::InventorySource;
pub use node::{HostUpgrader, NodeUpgrader};
pub use orchestrator::{Orchestrator, PhasePreview, PlanPreview};
pub use outcome::OutcomeTable;
pub use plan::{ConcurrencyPolicy, HostSelector, Phase, UpgradePlan};
pub use report::RunReport;
pub use scheduler::{auto_batch_size, partition, BatchScheduler, RoleRun};
pub use services::ServiceController;
pub use validation::{CheckSet, FleetCheck, HostCheck, Validator};

/// Common imports for driving a rollout
pub mod prelude {
    pub use crate::abort::{abort_pair, AbortHandle, AbortSignal};
    pub use crate::node::HostUpgrader;
    pub use crate::orchestrator::{Orchestrator, PlanPreview};
    pub use crate::plan::{ConcurrencyPolicy, UpgradePlan};
    pub use crate::report::RunReport;
    pub use rollout_core::prelude::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
