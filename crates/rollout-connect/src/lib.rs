//! Rollout Connect - concrete collaborators
//!
//! Thin, replaceable implementations of the two contracts the kernel
//! consumes:
//! - [`HttpControlPlane`]: REST client for the cluster manager, with
//!   bounded retry on transient failures
//! - [`SshExecutor`]: remote commands over the system `ssh` binary and
//!   reachability checks over plain TCP

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod http;
pub mod ssh;

pub use http::{Credentials, HttpControlPlane};
pub use ssh::SshExecutor;
