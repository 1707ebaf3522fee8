//! LogicalCluster (core.kcp.io)
//!
//! The singleton object inside every workspace. While a workspace is being
//! initialized its `status.initializers` lists every party that still has
//! to finish; the init-agent only ever removes its own entry.

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{cluster_name_from, cluster_path_from};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "core.kcp.io",
    version = "v1alpha1",
    kind = "LogicalCluster",
    status = "LogicalClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClusterSpec {
    /// Initializers requested when the workspace was created
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initializers: Vec<LogicalClusterInitializer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClusterStatus {
    /// Lifecycle phase (Scheduling, Initializing, Ready, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Base URL of the workspace
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Initializers that have not yet finished with this workspace
    #[serde(default)]
    pub initializers: Vec<LogicalClusterInitializer>,
}

/// Opaque marker identifying one initializer of a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct LogicalClusterInitializer(pub String);

impl LogicalClusterInitializer {
    /// Creates an initializer from its string form.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// String form of the initializer.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalClusterInitializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalClusterInitializer {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl LogicalCluster {
    /// Pending initializers from the status, empty if there is no status yet.
    pub fn initializers(&self) -> &[LogicalClusterInitializer] {
        self.status
            .as_ref()
            .map(|s| s.initializers.as_slice())
            .unwrap_or_default()
    }

    /// Whether `initializer` still has to finish with this cluster.
    pub fn has_initializer(&self, initializer: &LogicalClusterInitializer) -> bool {
        self.initializers().contains(initializer)
    }

    /// Initializer list with `initializer` removed, preserving order.
    pub fn initializers_without(&self, initializer: &LogicalClusterInitializer) -> Vec<LogicalClusterInitializer> {
        self.initializers()
            .iter()
            .filter(|i| *i != initializer)
            .cloned()
            .collect()
    }

    /// Internal logical cluster name (e.g. `2hwz9858cyir31hl`).
    pub fn cluster_name(&self) -> Option<&str> {
        cluster_name_from(self.annotations())
    }

    /// Human-facing workspace path (e.g. `root:customer:projectx`).
    pub fn cluster_path(&self) -> Option<&str> {
        cluster_path_from(self.annotations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(initializers: &[&str]) -> LogicalCluster {
        let mut lc = LogicalCluster::new("cluster", LogicalClusterSpec::default());
        lc.status = Some(LogicalClusterStatus {
            initializers: initializers.iter().map(|i| LogicalClusterInitializer::from(*i)).collect(),
            ..Default::default()
        });
        lc
    }

    #[test]
    fn test_initializer_membership() {
        let lc = cluster_with(&["root:types:a", "root:types:b"]);
        assert!(lc.has_initializer(&"root:types:a".into()));
        assert!(!lc.has_initializer(&"root:types:c".into()));
    }

    #[test]
    fn test_initializers_without_keeps_order_and_is_noop_when_absent() {
        let lc = cluster_with(&["x", "y", "z"]);
        assert_eq!(lc.initializers_without(&"y".into()), vec!["x".into(), "z".into()]);
        assert_eq!(lc.initializers_without(&"nope".into()).len(), 3);
    }

    #[test]
    fn test_missing_status_has_no_initializers() {
        let lc = LogicalCluster::new("cluster", LogicalClusterSpec::default());
        assert!(lc.initializers().is_empty());
    }

    #[test]
    fn test_status_url_field_name() {
        let status: LogicalClusterStatus = serde_json::from_value(serde_json::json!({
            "phase": "Initializing",
            "URL": "https://kcp/clusters/abc",
            "initializers": ["root:types:a"]
        }))
        .expect("valid status");
        assert_eq!(status.url.as_deref(), Some("https://kcp/clusters/abc"));
        assert_eq!(status.initializers, vec![LogicalClusterInitializer::from("root:types:a")]);
    }
}
