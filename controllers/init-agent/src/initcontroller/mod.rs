//! Init controller
//!
//! One init controller runs per InitTarget. It sees every LogicalCluster
//! that still carries the target's initializer, applies the target's
//! sources to it and finally removes the initializer.

pub mod reconciler;

use std::sync::Arc;

use crds::{InitTarget, LogicalClusterInitializer};
use kcp_client::{ClusterClientFactory, KcpClientTrait, KcpError};

use crate::source::SourceFactory;

pub use reconciler::{ClusterRequest, Reconciler};

/// Name reported on events and in logs.
pub const CONTROLLER_NAME: &str = "initagent-init";

/// Fetches the current version of one InitTarget.
///
/// Init controllers read their InitTarget through this on every pass instead
/// of holding a copy, so edits to the source list apply without restarting
/// any watches.
#[derive(Clone)]
pub struct InitTargetProvider {
    client: Arc<dyn KcpClientTrait>,
    name: String,
}

impl std::fmt::Debug for InitTargetProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitTargetProvider")
            .field("cluster", &self.client.cluster())
            .field("name", &self.name)
            .finish()
    }
}

impl InitTargetProvider {
    /// Provider for the InitTarget `name`, read through `client`.
    pub fn new(client: Arc<dyn KcpClientTrait>, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Name of the InitTarget.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The InitTarget as it is right now.
    pub async fn current(&self) -> Result<InitTarget, KcpError> {
        self.client.get_init_target(&self.name).await
    }
}

/// Builds init controllers for the supervisor.
#[derive(Debug, Clone)]
pub struct InitControllerFactory {
    sources: SourceFactory,
    config_workspace: String,
}

impl InitControllerFactory {
    /// `clusters` reaches the workspaces holding InitTemplates;
    /// `config_workspace` is used when an InitTarget does not say where it lives.
    pub fn new(clusters: Arc<dyn ClusterClientFactory>, config_workspace: impl Into<String>) -> Self {
        Self {
            sources: SourceFactory::new(clusters),
            config_workspace: config_workspace.into(),
        }
    }

    /// Reconciler for one InitTarget and its initializer.
    pub fn create(&self, target: InitTargetProvider, initializer: LogicalClusterInitializer) -> Reconciler {
        Reconciler::new(target, self.sources.clone(), initializer, self.config_workspace.clone())
    }
}
