//! Testing utilities for the Rollout workspace
//!
//! In-memory collaborators and fleet fixtures shared by the kernel tests.

#![allow(missing_docs)]

pub mod control_plane;
pub mod fixtures;
pub mod remote;

pub use control_plane::{FakeControlPlane, ServiceCall};
pub use fixtures::{fleet, host_records, test_config, TARGET_VERSION};
pub use remote::{FakeRemote, Step};
