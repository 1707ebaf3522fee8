//! Client traits for mocking
//!
//! These traits abstract workspace access so the init-agent's reconcilers
//! can be unit tested without a running kcp. The concrete `KcpClient`
//! implements them, and tests use `MockKcpClient`.

use std::sync::Arc;

use crds::{InitTarget, InitTemplate, LogicalCluster, WorkspaceType};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;
use kube::runtime::events::Event;

use crate::error::KcpError;

/// Operations against one logical cluster (workspace).
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait KcpClientTrait: Send + Sync {
    /// Cluster name or workspace path this client is scoped to
    fn cluster(&self) -> &str;

    /// Fetch an InitTarget by name
    async fn get_init_target(&self, name: &str) -> Result<InitTarget, KcpError>;

    /// Fetch an InitTemplate by name
    async fn get_init_template(&self, name: &str) -> Result<InitTemplate, KcpError>;

    /// Fetch a WorkspaceType by name
    async fn get_workspace_type(&self, name: &str) -> Result<WorkspaceType, KcpError>;

    /// Fetch a LogicalCluster, `None` if it is gone
    async fn get_logical_cluster(&self, name: &str) -> Result<Option<LogicalCluster>, KcpError>;

    /// JSON-merge-patch the status subresource of a LogicalCluster
    ///
    /// A `metadata.resourceVersion` inside the patch makes the write
    /// conditional; a stale version yields `KcpError::Conflict`.
    async fn patch_logical_cluster_status(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<LogicalCluster, KcpError>;

    /// Create an arbitrary object
    ///
    /// Fails with `KcpError::NoKindMatch` when the workspace does not serve
    /// the object's kind and with `KcpError::AlreadyExists` when an object
    /// with the same name is already present.
    async fn create_object(&self, object: &DynamicObject) -> Result<(), KcpError>;

    /// Publish an event about `reference`
    async fn publish_event(&self, reference: &ObjectReference, event: &Event) -> Result<(), KcpError>;
}

/// Hands out clients scoped to arbitrary logical clusters.
pub trait ClusterClientFactory: Send + Sync {
    /// Client for `cluster` (logical cluster name or workspace path)
    fn cluster(&self, cluster: &str) -> Result<Arc<dyn KcpClientTrait>, KcpError>;
}
