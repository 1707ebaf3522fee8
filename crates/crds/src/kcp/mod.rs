//! kcp object types
//!
//! Minimal mirrors of the kcp APIs the init-agent consumes. Only the fields
//! the agent reads or patches are modelled; everything else is preserved by
//! never round-tripping these objects through an update.

pub mod logical_cluster;
pub mod workspace_type;

pub use logical_cluster::*;
pub use workspace_type::*;

use std::collections::BTreeMap;

/// Annotation carrying the logical cluster name of any kcp object.
pub const LOGICAL_CLUSTER_ANNOTATION: &str = "kcp.io/cluster";

/// Annotation carrying the workspace path of a LogicalCluster.
pub const LOGICAL_CLUSTER_PATH_ANNOTATION: &str = "kcp.io/path";

/// Name of the singleton LogicalCluster object inside every workspace.
pub const LOGICAL_CLUSTER_OBJECT_NAME: &str = "cluster";

/// Separator between segments of a workspace path (`root:org:team`).
pub const PATH_SEPARATOR: char = ':';

/// Logical cluster name from an object's annotations.
pub fn cluster_name_from(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(LOGICAL_CLUSTER_ANNOTATION)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Workspace path from an object's annotations.
pub fn cluster_path_from(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(LOGICAL_CLUSTER_PATH_ANNOTATION)
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Joins a workspace path and a child name (`root:org` + `team`).
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{PATH_SEPARATOR}{child}")
    }
}
