//! InitTarget supervisor
//!
//! Reconciles InitTargets one at a time. For every selected InitTarget an
//! init controller and its watch topology are started exactly once; when
//! the InitTarget goes away (observed through a finalizer) they are
//! cancelled again.

use std::sync::Arc;
use std::time::Duration;

use crds::{InitTarget, WorkspaceType};
use kcp_client::{ClusterClientFactory, KcpClientTrait};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube_runtime::{watcher, Controller};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::registry::Registry;
use super::FINALIZER;
use crate::backoff::ErrorBackoff;
use crate::error::ControllerError;
use crate::initcontroller::{InitControllerFactory, InitTargetProvider};
use crate::selector::LabelSelector;
use crate::topology::TopologyFactory;
use crate::watcher::watch_resource;

/// Default period after which a running InitTarget is ensured again.
const DEFAULT_RESYNC: Duration = Duration::from_secs(300);

/// Starts and stops one init controller per InitTarget.
pub struct Supervisor {
    config_client: Arc<dyn KcpClientTrait>,
    clusters: Arc<dyn ClusterClientFactory>,
    init_controllers: InitControllerFactory,
    topologies: Arc<dyn TopologyFactory>,
    registry: Arc<Registry>,
    selector: LabelSelector,
    root: CancellationToken,
    resync: Duration,
    backoff: ErrorBackoff,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config_workspace", &self.config_client.cluster())
            .field("selector", &self.selector)
            .field("running", &self.registry().len())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Creates a supervisor for the InitTargets visible through `config_client`.
    ///
    /// `clusters` reaches WorkspaceTypes and InitTemplates in other
    /// workspaces. Every init controller is stopped when `root` is cancelled.
    pub fn new(
        config_client: Arc<dyn KcpClientTrait>,
        clusters: Arc<dyn ClusterClientFactory>,
        topologies: Arc<dyn TopologyFactory>,
        root: CancellationToken,
    ) -> Self {
        let init_controllers = InitControllerFactory::new(Arc::clone(&clusters), config_client.cluster());

        Self {
            config_client,
            clusters,
            init_controllers,
            topologies,
            registry: Arc::new(Registry::new()),
            selector: LabelSelector::default(),
            root,
            resync: DEFAULT_RESYNC,
            backoff: ErrorBackoff::new(5, 300),
        }
    }

    /// Only handle InitTargets matching `selector`.
    #[must_use]
    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Ensure running InitTargets again after `resync`.
    #[must_use]
    pub fn with_resync(mut self, resync: Duration) -> Self {
        self.resync = resync;
        self
    }

    /// Bounds of the error backoff, in seconds.
    #[must_use]
    pub fn with_backoff(mut self, min_seconds: u64, max_seconds: u64) -> Self {
        self.backoff = ErrorBackoff::new(min_seconds, max_seconds);
        self
    }

    /// Running init controllers.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether `target` is handled by this agent.
    pub fn selects(&self, target: &InitTarget) -> bool {
        self.selector.matches(target.labels())
    }

    /// Makes sure an init controller runs for `target`.
    ///
    /// Does nothing if one is already registered under the target's identity.
    pub async fn ensure(&self, target: &InitTarget) -> Result<Action, ControllerError> {
        let key = target.identity_key();
        if self.registry.contains(&key) {
            return Ok(Action::requeue(self.resync));
        }

        let workspace_type = self.workspace_type(target).await?;
        let initializer = workspace_type
            .initializer()
            .ok_or_else(|| ControllerError::InvalidWorkspaceType {
                name: workspace_type.name_any(),
                reason: "is not assigned to a logical cluster",
            })?;
        let topology = self.topologies.build(&workspace_type)?;

        let provider = InitTargetProvider::new(Arc::clone(&self.config_client), target.name_any());
        let reconciler = Arc::new(self.init_controllers.create(provider, initializer.clone()));

        let Some(registration) = self.registry.insert(&key, &self.root) else {
            return Ok(Action::requeue(self.resync));
        };

        info!(initializer = %initializer, "Starting init controller");

        let registry = Arc::clone(&self.registry);
        let span = info_span!("init_controller", init_target = %target.name_any(), initializer = %initializer);
        tokio::spawn(
            async move {
                let token = registration.token().clone();
                match topology.run(reconciler, token.clone()).await {
                    Ok(()) => info!("Init controller stopped"),
                    Err(e) => error!("Init controller failed: {}", e),
                }
                token.cancel();
                registry.release(&registration);
            }
            .instrument(span),
        );

        Ok(Action::requeue(self.resync))
    }

    /// Stops the init controller of `target`, if any.
    pub fn teardown(&self, target: &InitTarget) -> Action {
        if self.registry.remove(&target.identity_key()) {
            info!(init_target = %target.name_any(), "Stopped init controller");
        }
        Action::await_change()
    }

    async fn workspace_type(&self, target: &InitTarget) -> Result<WorkspaceType, ControllerError> {
        let reference = &target.spec.workspace_type_reference;
        let cluster = if reference.path.is_empty() {
            target.logical_cluster().unwrap_or(self.config_client.cluster())
        } else {
            reference.path.as_str()
        };

        let client = self.clusters.cluster(cluster).map_err(ControllerError::WorkspaceType)?;
        client
            .get_workspace_type(&reference.name)
            .await
            .map_err(ControllerError::WorkspaceType)
    }
}

/// Watches InitTargets through `api` until `token` is cancelled.
///
/// The selector is checked per object rather than on the watch, so a target
/// whose labels stop matching is still seen and can be released.
pub async fn run(api: Api<InitTarget>, supervisor: Arc<Supervisor>, token: CancellationToken) -> Result<(), ControllerError> {
    if !supervisor.selector.is_empty() {
        info!(selector = %supervisor.selector, "Only handling matching InitTargets");
    }

    let reconcile_api = api.clone();
    watch_resource(
        Controller::new(api, watcher::Config::default()),
        1,
        move |target, ctx| reconcile(reconcile_api.clone(), target, ctx),
        error_policy,
        supervisor,
        "InitTarget",
        token,
    )
    .await
}

async fn reconcile(api: Api<InitTarget>, target: Arc<InitTarget>, ctx: Arc<Supervisor>) -> Result<Action, ControllerError> {
    let span = info_span!("target", init_target = %target.name_any());

    async move {
        if !ctx.selects(&target) {
            debug!("InitTarget no longer matches the selector");
            let action = ctx.teardown(&target);
            release_finalizer(&api, &target).await?;
            return Ok(action);
        }

        let key = target.identity_key();
        let supervisor = Arc::clone(&ctx);
        let action = finalizer(&api, FINALIZER, target, move |event| async move {
            match event {
                FinalizerEvent::Apply(target) => supervisor.ensure(&target).await,
                FinalizerEvent::Cleanup(target) => Ok(supervisor.teardown(&target)),
            }
        })
        .await
        .map_err(|e| ControllerError::Finalizer(Box::new(e)))?;

        ctx.backoff.on_success(&key);
        Ok(action)
    }
    .instrument(span)
    .await
}

/// Removes our finalizer without waiting for deletion.
async fn release_finalizer(api: &Api<InitTarget>, target: &InitTarget) -> Result<(), ControllerError> {
    if !target.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }

    let remaining: Vec<&String> = target.finalizers().iter().filter(|f| *f != FINALIZER).collect();
    let mut patch = json!({ "metadata": { "finalizers": remaining } });
    if let Some(rv) = &target.metadata.resource_version {
        patch["metadata"]["resourceVersion"] = json!(rv);
    }

    api.patch(&target.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(target: Arc<InitTarget>, err: &ControllerError, ctx: Arc<Supervisor>) -> Action {
    let delay = ctx.backoff.on_error(&target.identity_key());
    error!(init_target = %target.name_any(), "Reconciliation error (retrying in {:?}): {}", delay, err);
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initcontroller::Reconciler;
    use crate::test_utils::*;
    use crate::topology::WatchTopology;
    use kcp_client::MockKcpClient;
    use serde_json::Value;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeTopologies {
        started: Arc<AtomicUsize>,
        stopped: Arc<AtomicUsize>,
        initializers: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    struct FakeTopology(FakeTopologies);

    impl TopologyFactory for FakeTopologies {
        fn build(&self, workspace_type: &WorkspaceType) -> Result<Box<dyn WatchTopology>, ControllerError> {
            if workspace_type.virtual_workspace_urls().is_empty() {
                return Err(ControllerError::InvalidWorkspaceType {
                    name: workspace_type.name_any(),
                    reason: "has no virtual workspace URLs",
                });
            }
            Ok(Box::new(FakeTopology(self.clone())))
        }
    }

    #[async_trait::async_trait]
    impl WatchTopology for FakeTopology {
        async fn run(self: Box<Self>, reconciler: Arc<Reconciler>, token: CancellationToken) -> Result<(), ControllerError> {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            self.0
                .initializers
                .lock()
                .expect("lock")
                .push(reconciler.initializer().to_string());

            if self.0.fail {
                return Err(ControllerError::Watch("shard went away".to_string()));
            }

            token.cancelled().await;
            self.0.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const VW_URL: &str = "https://kcp/services/initializingworkspaces/1ad6g5ktajmkg0wq:my-type";

    fn setup(topologies: &FakeTopologies) -> (MockKcpClient, Supervisor, CancellationToken) {
        let mock = MockKcpClient::new(CONFIG_WORKSPACE);
        mock.for_cluster("root:types")
            .add_workspace_type(create_test_workspace_type("my-type", &[VW_URL]));

        let root = CancellationToken::new();
        let supervisor = Supervisor::new(
            Arc::new(mock.clone()),
            Arc::new(mock.clone()),
            Arc::new(topologies.clone()),
            root.clone(),
        );
        (mock, supervisor, root)
    }

    /// A request seen by `FakeApiServer`.
    #[derive(Debug, Clone)]
    struct Recorded {
        method: http::Method,
        path: String,
        content_type: String,
        body: Value,
    }

    /// API server that answers every request with one InitTarget and
    /// records what it was sent.
    #[derive(Clone, Default)]
    struct FakeApiServer {
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl FakeApiServer {
        fn api(&self, reply: &InitTarget) -> Api<InitTarget> {
            let requests = Arc::clone(&self.requests);
            let reply = serde_json::to_vec(reply).expect("serializable target");

            let service = tower::service_fn(move |request: http::Request<kube::client::Body>| {
                let requests = Arc::clone(&requests);
                let reply = reply.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let body = body.collect_bytes().await.expect("request body");
                    requests.lock().expect("lock").push(Recorded {
                        method: parts.method,
                        path: parts.uri.path().to_string(),
                        content_type: parts
                            .headers
                            .get(http::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string(),
                        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                    });

                    let response = http::Response::builder()
                        .status(http::StatusCode::OK)
                        .header(http::header::CONTENT_TYPE, "application/json")
                        .body(kube::client::Body::from(reply))
                        .expect("valid response");
                    Ok::<_, Infallible>(response)
                }
            });

            Api::all(kube::Client::new(service, "default"))
        }

        fn patches(&self) -> Vec<Recorded> {
            self.requests
                .lock()
                .expect("lock")
                .iter()
                .filter(|r| r.method == http::Method::PATCH)
                .cloned()
                .collect()
        }
    }

    fn finalized(mut target: InitTarget, finalizers: &[&str]) -> InitTarget {
        target.metadata.finalizers = Some(finalizers.iter().map(ToString::to_string).collect());
        target.metadata.resource_version = Some("7".to_string());
        target
    }

    fn deleting(target: InitTarget) -> InitTarget {
        let mut value = serde_json::to_value(&target).expect("serializable target");
        value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        serde_json::from_value(value).expect("valid target")
    }

    async fn settle(done: impl Fn() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_ensure_twice_starts_one_controller() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let target = create_test_init_target("init-my-type", "uid-1", &["basics"]);

        supervisor.ensure(&target).await.expect("first ensure");
        supervisor.ensure(&target).await.expect("second ensure");
        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;

        assert_eq!(topologies.started.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.registry().len(), 1);
        assert_eq!(
            *topologies.initializers.lock().expect("lock"),
            vec![format!("{WST_CLUSTER}:my-type")]
        );
    }

    #[tokio::test]
    async fn test_teardown_stops_controller_and_is_idempotent() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let target = create_test_init_target("init-my-type", "uid-1", &[]);

        supervisor.ensure(&target).await.expect("ensure");
        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;

        supervisor.teardown(&target);
        settle(|| topologies.stopped.load(Ordering::SeqCst) > 0).await;
        assert_eq!(topologies.stopped.load(Ordering::SeqCst), 1);
        assert!(supervisor.registry().is_empty());

        supervisor.teardown(&target);
        assert!(supervisor.registry().is_empty());

        // The same target can be started again afterwards
        supervisor.ensure(&target).await.expect("ensure again");
        settle(|| topologies.started.load(Ordering::SeqCst) > 1).await;
        assert_eq!(topologies.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_topology_is_released_and_recreated() {
        let topologies = FakeTopologies {
            fail: true,
            ..Default::default()
        };
        let (_mock, supervisor, _root) = setup(&topologies);
        let target = create_test_init_target("init-my-type", "uid-1", &[]);

        supervisor.ensure(&target).await.expect("ensure");
        settle(|| supervisor.registry().is_empty()).await;
        assert!(supervisor.registry().is_empty());

        // Deleting a target whose controller already stopped is harmless
        supervisor.teardown(&target);

        supervisor.ensure(&target).await.expect("ensure again");
        settle(|| topologies.started.load(Ordering::SeqCst) > 1).await;
        assert_eq!(topologies.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_root_cancellation_stops_all_controllers() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, root) = setup(&topologies);

        supervisor
            .ensure(&create_test_init_target("a", "uid-a", &[]))
            .await
            .expect("ensure a");
        supervisor
            .ensure(&create_test_init_target("b", "uid-b", &[]))
            .await
            .expect("ensure b");
        settle(|| topologies.started.load(Ordering::SeqCst) == 2).await;

        root.cancel();
        settle(|| supervisor.registry().is_empty()).await;
        assert_eq!(topologies.stopped.load(Ordering::SeqCst), 2);
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_missing_workspace_type_is_an_error() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let mut target = create_test_init_target("init-my-type", "uid-1", &[]);
        target.spec.workspace_type_reference.name = "unknown".to_string();

        let err = supervisor.ensure(&target).await.expect_err("no such type");
        assert!(matches!(err, ControllerError::WorkspaceType(_)), "{err}");
        assert!(err.to_string().starts_with("failed to retrieve WorkspaceType"));
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_type_in_target_cluster_when_path_is_empty() {
        let topologies = FakeTopologies::default();
        let (mock, supervisor, _root) = setup(&topologies);
        mock.add_workspace_type(create_test_workspace_type("local-type", &[VW_URL]));

        let mut target = create_test_init_target("init-local", "uid-1", &[]);
        target.spec.workspace_type_reference.path = String::new();
        target.spec.workspace_type_reference.name = "local-type".to_string();

        supervisor.ensure(&target).await.expect("ensure");
        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;
        assert_eq!(
            *topologies.initializers.lock().expect("lock"),
            vec![format!("{WST_CLUSTER}:local-type")]
        );
    }

    #[tokio::test]
    async fn test_unusable_workspace_types_are_rejected() {
        let topologies = FakeTopologies::default();
        let (mock, supervisor, _root) = setup(&topologies);
        let types = mock.for_cluster("root:types");

        types.add_workspace_type(create_test_workspace_type("no-urls", &[]));
        let mut target = create_test_init_target("init-no-urls", "uid-1", &[]);
        target.spec.workspace_type_reference.name = "no-urls".to_string();
        let err = supervisor.ensure(&target).await.expect_err("no URLs");
        assert!(matches!(err, ControllerError::InvalidWorkspaceType { .. }), "{err}");

        let mut unplaced = create_test_workspace_type("unplaced", &[VW_URL]);
        unplaced.metadata.annotations = None;
        types.add_workspace_type(unplaced);
        target.spec.workspace_type_reference.name = "unplaced".to_string();
        let err = supervisor.ensure(&target).await.expect_err("no cluster");
        assert!(matches!(err, ControllerError::InvalidWorkspaceType { .. }), "{err}");

        assert!(supervisor.registry().is_empty());
        assert_eq!(topologies.started.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_selector_filters_targets() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = supervisor.with_selector("env=prod".parse().expect("valid selector"));

        let mut target = create_test_init_target("init-my-type", "uid-1", &[]);
        assert!(!supervisor.selects(&target));

        target.labels_mut().insert("env".to_string(), "prod".to_string());
        assert!(supervisor.selects(&target));
    }

    #[tokio::test]
    async fn test_new_target_gets_finalizer_before_start() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = Arc::new(supervisor);
        let target = create_test_init_target("init-my-type", "uid-1", &[]);
        let server = FakeApiServer::default();

        let action = reconcile(server.api(&target), Arc::new(target), Arc::clone(&supervisor))
            .await
            .expect("reconcile");
        assert_eq!(action, Action::await_change());

        let patches = server.patches();
        assert_eq!(patches.len(), 1);
        assert!(patches[0].path.ends_with("/inittargets/init-my-type"), "{}", patches[0].path);
        assert_eq!(patches[0].content_type, "application/json-patch+json");
        assert_eq!(patches[0].body[1]["op"], "add");
        assert_eq!(patches[0].body[1]["value"], json!([FINALIZER]));

        assert!(supervisor.registry().is_empty());
        assert_eq!(topologies.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finalized_target_starts_controller() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = Arc::new(supervisor);
        let target = finalized(create_test_init_target("init-my-type", "uid-1", &[]), &[FINALIZER]);
        let server = FakeApiServer::default();

        let action = reconcile(server.api(&target), Arc::new(target.clone()), Arc::clone(&supervisor))
            .await
            .expect("reconcile");
        assert_eq!(action, Action::requeue(DEFAULT_RESYNC));

        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;
        assert_eq!(topologies.started.load(Ordering::SeqCst), 1);
        assert!(supervisor.registry().contains(&target.identity_key()));
        assert!(server.patches().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_target_stops_controller_and_drops_finalizer() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = Arc::new(supervisor);
        let target = finalized(create_test_init_target("init-my-type", "uid-1", &[]), &[FINALIZER]);

        supervisor.ensure(&target).await.expect("ensure");
        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;

        let target = deleting(target);
        let server = FakeApiServer::default();
        let action = reconcile(server.api(&target), Arc::new(target), Arc::clone(&supervisor))
            .await
            .expect("reconcile");
        assert_eq!(action, Action::await_change());

        settle(|| topologies.stopped.load(Ordering::SeqCst) > 0).await;
        assert_eq!(topologies.stopped.load(Ordering::SeqCst), 1);
        assert!(supervisor.registry().is_empty());

        let patches = server.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].body[1]["op"], "remove");
        assert_eq!(patches[0].body[1]["path"], "/metadata/finalizers/0");
    }

    #[tokio::test]
    async fn test_deselected_target_is_stopped_and_released() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = Arc::new(supervisor.with_selector("env=prod".parse().expect("valid selector")));

        let mut target = finalized(
            create_test_init_target("init-my-type", "uid-1", &[]),
            &["example.com/keep", FINALIZER],
        );
        target.labels_mut().insert("env".to_string(), "prod".to_string());
        supervisor.ensure(&target).await.expect("ensure");
        settle(|| topologies.started.load(Ordering::SeqCst) > 0).await;

        // Labels changed; the watch still delivers the object
        target.labels_mut().insert("env".to_string(), "dev".to_string());
        let server = FakeApiServer::default();
        let action = reconcile(server.api(&target), Arc::new(target), Arc::clone(&supervisor))
            .await
            .expect("reconcile");
        assert_eq!(action, Action::await_change());

        settle(|| topologies.stopped.load(Ordering::SeqCst) > 0).await;
        assert_eq!(topologies.stopped.load(Ordering::SeqCst), 1);
        assert!(supervisor.registry().is_empty());

        let patches = server.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].content_type, "application/merge-patch+json");
        assert_eq!(
            patches[0].body,
            json!({ "metadata": { "finalizers": ["example.com/keep"], "resourceVersion": "7" } })
        );
    }

    #[tokio::test]
    async fn test_deselected_target_without_finalizer_is_left_alone() {
        let topologies = FakeTopologies::default();
        let (_mock, supervisor, _root) = setup(&topologies);
        let supervisor = Arc::new(supervisor.with_selector("env=prod".parse().expect("valid selector")));
        let target = create_test_init_target("init-my-type", "uid-1", &[]);
        let server = FakeApiServer::default();

        reconcile(server.api(&target), Arc::new(target), Arc::clone(&supervisor))
            .await
            .expect("reconcile");
        assert!(server.requests.lock().expect("lock").is_empty());
        assert_eq!(topologies.started.load(Ordering::SeqCst), 0);
    }
}
