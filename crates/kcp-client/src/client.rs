//! kcp API client implementation
//!
//! `KcpClusterClient` holds the base REST config and builds one
//! `KcpClient` per logical cluster on demand, reusing it afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crds::{InitTarget, InitTemplate, LogicalCluster, WorkspaceType};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiCapabilities, ApiResource, Scope};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::Client;
use tracing::debug;

use crate::error::KcpError;
use crate::kcp_trait::{ClusterClientFactory, KcpClientTrait};
use crate::rest::retarget_config;

/// Namespace used for namespaced objects that do not name one.
const DEFAULT_NAMESPACE: &str = "default";

/// Cached clients beyond this many are dropped all at once.
const MAX_CACHED_CLIENTS: usize = 256;

/// Builds clients for any logical cluster reachable from one base config.
#[derive(Clone)]
pub struct KcpClusterClient {
    base: kube::Config,
    reporter: Reporter,
    clients: Arc<Mutex<HashMap<String, KcpClient>>>,
}

impl std::fmt::Debug for KcpClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KcpClusterClient")
            .field("base", &self.base.cluster_url)
            .finish_non_exhaustive()
    }
}

impl KcpClusterClient {
    /// Creates a factory; `controller` is reported as the source of events.
    pub fn new(base: kube::Config, controller: &str) -> Self {
        Self {
            base,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
            clients: Arc::default(),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, KcpClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Concrete client for `cluster`.
    ///
    /// Clients share their connection pool with every later call for the
    /// same cluster, including calls through clones of this factory.
    pub fn client_for(&self, cluster: &str) -> Result<KcpClient, KcpError> {
        if let Some(client) = self.clients().get(cluster) {
            return Ok(client.clone());
        }

        let config = retarget_config(&self.base, cluster)?;
        let client = KcpClient::new(Client::try_from(config)?, cluster, self.reporter.clone());

        let mut clients = self.clients();
        if clients.len() >= MAX_CACHED_CLIENTS {
            debug!(dropped = clients.len(), "Client cache full, starting over");
            clients.clear();
        }
        Ok(clients.entry(cluster.to_string()).or_insert(client).clone())
    }

    /// Number of cached per-cluster clients.
    pub fn cached_clients(&self) -> usize {
        self.clients().len()
    }
}

impl ClusterClientFactory for KcpClusterClient {
    fn cluster(&self, cluster: &str) -> Result<Arc<dyn KcpClientTrait>, KcpError> {
        Ok(Arc::new(self.client_for(cluster)?))
    }
}

/// Client scoped to a single logical cluster.
#[derive(Clone)]
pub struct KcpClient {
    cluster: String,
    client: Client,
    reporter: Reporter,
}

impl std::fmt::Debug for KcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KcpClient")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

impl KcpClient {
    /// Wraps a `kube::Client` whose base URL already targets `cluster`.
    pub fn new(client: Client, cluster: impl Into<String>, reporter: Reporter) -> Self {
        Self {
            cluster: cluster.into(),
            client,
            reporter,
        }
    }

    /// Underlying kube client.
    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    /// Resolves the API resource for a kind via discovery.
    ///
    /// Both "group/version not served" (404) and "kind not in the group"
    /// mean the workspace does not know the kind yet, e.g. because its CRD
    /// was created moments ago.
    async fn resolve_kind(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities), KcpError> {
        match discovery::pinned_kind(&self.client, gvk).await {
            Ok(resolved) => Ok(resolved),
            Err(kube::Error::Discovery(e)) => Err(KcpError::NoKindMatch(format!(
                "{}/{} {}: {e}",
                gvk.group, gvk.version, gvk.kind
            ))),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KcpError::NoKindMatch(format!(
                "{}/{} {}: {}",
                gvk.group, gvk.version, gvk.kind, resp.message
            ))),
            Err(e) => Err(KcpError::Kube(e)),
        }
    }
}

fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, KcpError> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| KcpError::InvalidObject("object has no apiVersion/kind".to_string()))?;

    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };

    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

#[async_trait::async_trait]
impl KcpClientTrait for KcpClient {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn get_init_target(&self, name: &str) -> Result<InitTarget, KcpError> {
        let api: Api<InitTarget> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| KcpError::from_kube(e, &format!("InitTarget {name}")))
    }

    async fn get_init_template(&self, name: &str) -> Result<InitTemplate, KcpError> {
        let api: Api<InitTemplate> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| KcpError::from_kube(e, &format!("InitTemplate {name}")))
    }

    async fn get_workspace_type(&self, name: &str) -> Result<WorkspaceType, KcpError> {
        let api: Api<WorkspaceType> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| KcpError::from_kube(e, &format!("WorkspaceType {name}")))
    }

    async fn get_logical_cluster(&self, name: &str) -> Result<Option<LogicalCluster>, KcpError> {
        let api: Api<LogicalCluster> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| KcpError::from_kube(e, &format!("LogicalCluster {name}")))
    }

    async fn patch_logical_cluster_status(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<LogicalCluster, KcpError> {
        let api: Api<LogicalCluster> = Api::all(self.client.clone());
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| KcpError::from_kube(e, &format!("LogicalCluster {name}")))
    }

    async fn create_object(&self, object: &DynamicObject) -> Result<(), KcpError> {
        let gvk = gvk_of(object)?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| KcpError::InvalidObject(format!("{} without metadata.name", gvk.kind)))?;

        let (resource, caps) = self.resolve_kind(&gvk).await?;

        let api: Api<DynamicObject> = match caps.scope {
            Scope::Namespaced => {
                let namespace = object.metadata.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
                Api::namespaced_with(self.client.clone(), namespace, &resource)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };

        debug!(cluster = %self.cluster, kind = %gvk.kind, name, "Creating object");

        api.create(&PostParams::default(), object)
            .await
            .map(|_| ())
            .map_err(|e| KcpError::from_kube(e, &format!("{} {name}", gvk.kind)))
    }

    async fn publish_event(&self, reference: &ObjectReference, event: &Event) -> Result<(), KcpError> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        recorder.publish(event, reference).await?;
        Ok(())
    }
}
