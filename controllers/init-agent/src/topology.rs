//! Watch topologies
//!
//! A topology delivers pending LogicalClusters of one WorkspaceType to an
//! init controller. kcp exposes those through the initializing virtual
//! workspace of the type, one URL per shard; `VirtualWorkspaceTopology`
//! runs one LogicalCluster watch per URL.
//!
//! Every LogicalCluster object is named `cluster` and is not namespaced, so
//! the watch moves the logical cluster name into the namespace slot before
//! objects reach the controller's cache and work queue.

use std::sync::Arc;
use std::time::Duration;

use crds::{LogicalCluster, WorkspaceType};
use futures::{Stream, TryStreamExt};
use kcp_client::rest::retarget_config;
use kcp_client::{ClusterClientFactory, KcpClusterClient, KcpError};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::reflector::{self, store::Writer};
use kube_runtime::watcher::{self, watcher};
use kube_runtime::{Controller, WatchStreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::backoff::ErrorBackoff;
use crate::error::ControllerError;
use crate::initcontroller::{ClusterRequest, Reconciler, CONTROLLER_NAME};
use crate::watcher::watch_resource;

/// A running set of watches feeding one init controller.
#[async_trait::async_trait]
pub trait WatchTopology: Send {
    /// Runs until `token` is cancelled (`Ok`) or the watches break (`Err`).
    async fn run(self: Box<Self>, reconciler: Arc<Reconciler>, token: CancellationToken) -> Result<(), ControllerError>;
}

/// Builds the topology for a WorkspaceType.
pub trait TopologyFactory: Send + Sync {
    /// Validates `workspace_type` and prepares, but does not start, its topology.
    fn build(&self, workspace_type: &WorkspaceType) -> Result<Box<dyn WatchTopology>, ControllerError>;
}

/// Settings shared by all virtual workspace topologies.
#[derive(Debug, Clone)]
pub struct VirtualWorkspaceTopologyFactory {
    base: kube::Config,
    workers: u16,
    retry_delay: Duration,
    backoff_min_secs: u64,
    backoff_max_secs: u64,
}

impl VirtualWorkspaceTopologyFactory {
    /// `base` supplies credentials; its URL is replaced by each virtual workspace URL.
    pub fn new(base: kube::Config, workers: usize, retry_delay: Duration, backoff_min_secs: u64, backoff_max_secs: u64) -> Self {
        Self {
            base,
            workers: u16::try_from(workers).unwrap_or(u16::MAX),
            retry_delay,
            backoff_min_secs,
            backoff_max_secs,
        }
    }
}

impl TopologyFactory for VirtualWorkspaceTopologyFactory {
    fn build(&self, workspace_type: &WorkspaceType) -> Result<Box<dyn WatchTopology>, ControllerError> {
        let urls = workspace_type.virtual_workspace_urls();
        if urls.is_empty() {
            return Err(ControllerError::InvalidWorkspaceType {
                name: workspace_type.name_any(),
                reason: "has no virtual workspace URLs",
            });
        }

        let shards = urls
            .into_iter()
            .map(|url| virtual_workspace_config(&self.base, url))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(VirtualWorkspaceTopology {
            shards,
            workers: self.workers,
            retry_delay: self.retry_delay,
            backoff_min_secs: self.backoff_min_secs,
            backoff_max_secs: self.backoff_max_secs,
        }))
    }
}

/// `base` pointed at a virtual workspace URL.
fn virtual_workspace_config(base: &kube::Config, url: &str) -> Result<kube::Config, KcpError> {
    let mut config = base.clone();
    config.cluster_url = url
        .parse()
        .map_err(|e| KcpError::InvalidConfig(format!("invalid virtual workspace URL {url:?}: {e}")))?;
    Ok(config)
}

/// LogicalCluster watches on every shard of a WorkspaceType's virtual workspace.
#[derive(Debug)]
pub struct VirtualWorkspaceTopology {
    shards: Vec<kube::Config>,
    workers: u16,
    retry_delay: Duration,
    backoff_min_secs: u64,
    backoff_max_secs: u64,
}

/// Context of one shard's LogicalCluster controller.
struct ShardContext {
    reconciler: Arc<Reconciler>,
    clusters: Arc<dyn ClusterClientFactory>,
    retry_delay: Duration,
    backoff: ErrorBackoff,
}

#[async_trait::async_trait]
impl WatchTopology for VirtualWorkspaceTopology {
    async fn run(self: Box<Self>, reconciler: Arc<Reconciler>, token: CancellationToken) -> Result<(), ControllerError> {
        let mut shards = JoinSet::new();

        for config in self.shards {
            let shard = config.cluster_url.to_string();
            let wildcard = Client::try_from(retarget_config(&config, "*")?)?;

            let context = Arc::new(ShardContext {
                reconciler: Arc::clone(&reconciler),
                clusters: Arc::new(KcpClusterClient::new(config, CONTROLLER_NAME)),
                retry_delay: self.retry_delay,
                backoff: ErrorBackoff::new(self.backoff_min_secs, self.backoff_max_secs),
            });

            let api: Api<LogicalCluster> = Api::all(wildcard);
            let token = token.clone();
            let workers = self.workers;

            info!(shard = %shard, "Watching initializing workspaces");
            shards.spawn(
                async move {
                    let (reader, writer) = reflector::store();
                    let events = watcher(api, watcher::Config::default()).default_backoff();
                    watch_resource(
                        Controller::for_stream(keyed_by_cluster(events, writer), reader),
                        workers,
                        reconcile_cluster,
                        cluster_error_policy,
                        context,
                        "LogicalCluster",
                        token,
                    )
                    .await
                }
                .instrument(tracing::info_span!("shard", url = %shard)),
            );
        }

        // One broken shard stops the whole topology so it can be rebuilt.
        let mut result = Ok(());
        while let Some(joined) = shards.join_next().await {
            let outcome = joined.map_err(|e| ControllerError::Watch(format!("shard task failed: {e}"))).and_then(|r| r);
            if let Err(e) = outcome {
                token.cancel();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }
}

/// Applied LogicalClusters, cached in `writer` under their logical cluster.
fn keyed_by_cluster<S>(events: S, writer: Writer<LogicalCluster>) -> impl Stream<Item = Result<LogicalCluster, watcher::Error>> + Send
where
    S: Stream<Item = Result<watcher::Event<LogicalCluster>, watcher::Error>> + Send,
{
    events
        .map_ok(|event| event.modify(key_by_cluster))
        .reflect(writer)
        .applied_objects()
}

fn key_by_cluster(lc: &mut LogicalCluster) {
    lc.metadata.namespace = lc.cluster_name().map(str::to_string);
}

async fn reconcile_cluster(lc: Arc<LogicalCluster>, ctx: Arc<ShardContext>) -> Result<Action, ControllerError> {
    let Some(cluster) = lc.cluster_name() else {
        warn!(name = %lc.name_any(), "LogicalCluster without {} annotation", crds::LOGICAL_CLUSTER_ANNOTATION);
        return Ok(Action::await_change());
    };

    let request = ClusterRequest {
        cluster: cluster.to_string(),
        name: lc.name_any(),
    };
    let key = format!("{}/{}", request.cluster, request.name);

    let client = ctx.clusters.cluster(&request.cluster)?;
    let requeue = ctx.reconciler.reconcile(client.as_ref(), &request).await?;

    ctx.backoff.on_success(&key);
    if requeue {
        Ok(Action::requeue(ctx.retry_delay))
    } else {
        Ok(Action::await_change())
    }
}

fn cluster_error_policy(lc: Arc<LogicalCluster>, err: &ControllerError, ctx: Arc<ShardContext>) -> Action {
    let cluster = lc.cluster_name().unwrap_or_default();
    let delay = ctx.backoff.on_error(&format!("{cluster}/{}", lc.name_any()));
    error!(dest_cluster = %cluster, "Reconciler error (retrying in {:?}): {}", delay, err);
    Action::requeue(delay)
}
