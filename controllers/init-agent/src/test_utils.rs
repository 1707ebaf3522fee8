//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test objects and setting up
//! test scenarios against `MockKcpClient`.

#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;

/// Workspace holding InitTargets and InitTemplates in tests
#[cfg(test)]
pub const CONFIG_WORKSPACE: &str = "root:init-agent";

/// Logical cluster name of the workspace being initialized in tests
#[cfg(test)]
pub const DEST_CLUSTER: &str = "2hwz9858cyir31hl";

/// Workspace path of the workspace being initialized in tests
#[cfg(test)]
pub const DEST_PATH: &str = "root:customer:projectx";

/// Logical cluster holding the WorkspaceType in tests
#[cfg(test)]
pub const WST_CLUSTER: &str = "1ad6g5ktajmkg0wq";

/// Helper to create a test InitTarget with template sources
#[cfg(test)]
pub fn create_test_init_target(name: &str, uid: &str, templates: &[&str]) -> InitTarget {
    InitTarget {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(uid.to_string()),
            annotations: Some(BTreeMap::from([(
                LOGICAL_CLUSTER_ANNOTATION.to_string(),
                CONFIG_WORKSPACE.to_string(),
            )])),
            ..Default::default()
        },
        spec: InitTargetSpec {
            workspace_type_reference: WorkspaceTypeReference {
                path: "root:types".to_string(),
                name: "my-type".to_string(),
            },
            sources: templates
                .iter()
                .map(|t| InitSource::Template(TemplateInitSource { name: t.to_string() }))
                .collect(),
        },
    }
}

/// Helper to create a test InitTemplate
#[cfg(test)]
pub fn create_test_init_template(name: &str, template: &str) -> InitTemplate {
    InitTemplate::new(
        name,
        InitTemplateSpec {
            template: template.to_string(),
        },
    )
}

/// Helper to create a test WorkspaceType living in `WST_CLUSTER`
#[cfg(test)]
pub fn create_test_workspace_type(name: &str, urls: &[&str]) -> WorkspaceType {
    let mut wst = WorkspaceType::new(name, WorkspaceTypeSpec { initializer: true });
    wst.metadata.annotations = Some(BTreeMap::from([(
        LOGICAL_CLUSTER_ANNOTATION.to_string(),
        WST_CLUSTER.to_string(),
    )]));
    wst.status = Some(WorkspaceTypeStatus {
        virtual_workspaces: urls
            .iter()
            .map(|url| VirtualWorkspace { url: url.to_string() })
            .collect(),
    });
    wst
}

/// Helper to create the LogicalCluster of `DEST_CLUSTER` with pending initializers
#[cfg(test)]
pub fn create_test_logical_cluster(initializers: &[&str]) -> LogicalCluster {
    create_test_logical_cluster_in(DEST_CLUSTER, DEST_PATH, initializers)
}

/// Helper to create the LogicalCluster of any workspace with pending initializers
#[cfg(test)]
pub fn create_test_logical_cluster_in(cluster: &str, path: &str, initializers: &[&str]) -> LogicalCluster {
    let mut lc = LogicalCluster::new(LOGICAL_CLUSTER_OBJECT_NAME, LogicalClusterSpec::default());
    lc.metadata.annotations = Some(BTreeMap::from([
        (LOGICAL_CLUSTER_ANNOTATION.to_string(), cluster.to_string()),
        (LOGICAL_CLUSTER_PATH_ANNOTATION.to_string(), path.to_string()),
    ]));
    lc.status = Some(LogicalClusterStatus {
        phase: Some("Initializing".to_string()),
        url: None,
        initializers: initializers.iter().map(|i| LogicalClusterInitializer::from(*i)).collect(),
    });
    lc
}
