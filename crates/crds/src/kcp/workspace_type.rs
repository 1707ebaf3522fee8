//! WorkspaceType (tenancy.kcp.io)
//!
//! The policy object behind every workspace. For the init-agent it provides
//! two things: the initializer identity new workspaces of this type carry,
//! and the URLs of the "initializing" virtual workspace through which those
//! workspaces can be watched and written to.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{cluster_name_from, join_path, LogicalClusterInitializer};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "tenancy.kcp.io",
    version = "v1alpha1",
    kind = "WorkspaceType",
    status = "WorkspaceTypeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceTypeSpec {
    /// Whether workspaces of this type wait for an initializer
    #[serde(default)]
    pub initializer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceTypeStatus {
    /// Virtual workspace endpoints, one per shard
    #[serde(default)]
    pub virtual_workspaces: Vec<VirtualWorkspace>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualWorkspace {
    /// Base URL of the virtual workspace
    pub url: String,
}

impl WorkspaceType {
    /// The initializer that workspaces of this type carry until initialized.
    ///
    /// kcp derives it from where the type lives: `<logical cluster>:<name>`.
    /// Returns `None` when the object carries no cluster annotation.
    pub fn initializer(&self) -> Option<LogicalClusterInitializer> {
        let cluster = cluster_name_from(self.annotations())?;
        Some(LogicalClusterInitializer(join_path(cluster, &self.name_any())))
    }

    /// URLs of the initializing virtual workspace, one per shard.
    pub fn virtual_workspace_urls(&self) -> Vec<&str> {
        self.status
            .iter()
            .flat_map(|s| s.virtual_workspaces.iter())
            .map(|vw| vw.url.as_str())
            .filter(|url| !url.is_empty())
            .collect()
    }
}
