//! Target controller
//!
//! Keeps exactly one init controller running for every InitTarget in the
//! configuration workspace.

pub mod registry;
pub mod supervisor;

pub use supervisor::{run, Supervisor};

/// Finalizer placed on InitTargets so their deletion is observed.
pub const FINALIZER: &str = "initialization.kcp.io/init-agent";
