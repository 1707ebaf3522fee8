//! Init Agent CRD Definitions
//!
//! Kubernetes Custom Resource Definitions owned by the init-agent
//! (`InitTarget`, `InitTemplate`) and the kcp-owned object types it reads
//! and patches (`LogicalCluster`, `WorkspaceType`).

pub mod init_target;
pub mod init_template;
pub mod kcp;

pub use init_target::*;
pub use init_template::*;
pub use kcp::*;

/// API group of the init-agent's own resources.
pub const GROUP: &str = "initialization.kcp.io";
