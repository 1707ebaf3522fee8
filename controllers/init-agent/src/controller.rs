//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the kcp clients,
//! the InitTarget supervisor and the virtual workspace topologies together
//! and runs them until shutdown.

use std::sync::Arc;

use crds::InitTarget;
use kcp_client::KcpClusterClient;
use kube::Api;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ControllerError;
use crate::initcontroller::CONTROLLER_NAME;
use crate::targetcontroller::{self, Supervisor};
use crate::topology::VirtualWorkspaceTopologyFactory;

/// The running init-agent.
#[derive(Debug)]
pub struct Controller {
    supervisor: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to the configuration workspace and starts the supervisor.
    ///
    /// Everything started here stops once `token` is cancelled.
    pub async fn new(config: &Config, kube_config: kube::Config, token: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing Init Agent");

        let clusters = KcpClusterClient::new(kube_config.clone(), CONTROLLER_NAME);
        let config_client = clusters.client_for(&config.config_workspace)?;

        // Fail early if the configuration workspace is not reachable
        let version = config_client.kube_client().apiserver_version().await.map_err(|e| {
            error!("Failed to reach configuration workspace {}: {}", config.config_workspace, e);
            ControllerError::Kube(e)
        })?;
        info!("Connected to kcp {} (workspace {})", version.git_version, config.config_workspace);

        let api: Api<InitTarget> = Api::all(config_client.kube_client().clone());

        let topologies = VirtualWorkspaceTopologyFactory::new(
            kube_config,
            config.workers,
            config.retry_delay,
            config.error_backoff_min_secs,
            config.error_backoff_max_secs,
        );

        let supervisor = Supervisor::new(
            Arc::new(config_client),
            Arc::new(clusters),
            Arc::new(topologies),
            token.clone(),
        )
        .with_selector(config.target_selector.clone())
        .with_resync(config.target_resync)
        .with_backoff(config.error_backoff_min_secs, config.error_backoff_max_secs);

        let supervisor = tokio::spawn(targetcontroller::run(api, Arc::new(supervisor), token));

        Ok(Self { supervisor })
    }

    /// Waits until the supervisor stops.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Init Agent running");

        self.supervisor
            .await
            .map_err(|e| ControllerError::Watch(format!("InitTarget watcher panicked: {e}")))?
            .map_err(|e| ControllerError::Watch(format!("InitTarget watcher error: {e}")))?;

        info!("Init Agent stopped");
        Ok(())
    }
}
