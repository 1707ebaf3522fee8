//! Reconciliation of workspaces pending initialization.

use crds::{LogicalCluster, LogicalClusterInitializer};
use kcp_client::KcpClientTrait;
use kube::runtime::events::{Event, EventType};
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info, info_span, warn, Instrument};

use super::InitTargetProvider;
use crate::error::ControllerError;
use crate::manifest::apply_manifests;
use crate::source::{RenderContext, SourceFactory};

/// Event reason used when a pass fails.
pub const REASON_RECONCILING_FAILED: &str = "ReconcilingFailed";

/// Identifies the LogicalCluster to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterRequest {
    /// Logical cluster the object lives in
    pub cluster: String,
    /// Object name (always `cluster` for LogicalClusters)
    pub name: String,
}

/// Initializes workspaces for one InitTarget.
#[derive(Debug)]
pub struct Reconciler {
    target: InitTargetProvider,
    sources: SourceFactory,
    initializer: LogicalClusterInitializer,
    config_workspace: String,
}

impl Reconciler {
    /// Creates a reconciler; see `InitControllerFactory::create`.
    pub fn new(
        target: InitTargetProvider,
        sources: SourceFactory,
        initializer: LogicalClusterInitializer,
        config_workspace: String,
    ) -> Self {
        Self {
            target,
            sources,
            initializer,
            config_workspace,
        }
    }

    /// The initializer this reconciler removes when done.
    pub fn initializer(&self) -> &LogicalClusterInitializer {
        &self.initializer
    }

    /// Runs one pass for `request`, using `client` scoped to the request's cluster.
    ///
    /// Returns `Ok(true)` when the pass should be repeated after a short
    /// fixed delay. Errors are also published as a Warning event on the
    /// LogicalCluster.
    pub async fn reconcile(&self, client: &dyn KcpClientTrait, request: &ClusterRequest) -> Result<bool, ControllerError> {
        debug!(dest_cluster = %request.cluster, "Processing");

        let Some(lc) = client.get_logical_cluster(&request.name).await? else {
            return Ok(false);
        };

        // Already done; the virtual workspace should stop showing it soon.
        if !lc.has_initializer(&self.initializer) {
            return Ok(false);
        }

        let workspace = lc.cluster_path().unwrap_or_default().to_string();
        let span = info_span!("init", dest_cluster = %request.cluster, dest_workspace = %workspace);

        let result = async {
            let ctx = RenderContext {
                cluster_name: lc.cluster_name().unwrap_or(&request.cluster).to_string(),
                cluster_path: lc
                    .cluster_path()
                    .ok_or_else(|| {
                        ControllerError::MissingAnnotation(request.cluster.clone(), crds::LOGICAL_CLUSTER_PATH_ANNOTATION)
                    })?
                    .to_string(),
            };

            self.initialize(client, &lc, &ctx).await
        }
        .instrument(span.clone())
        .await;

        if let Err(err) = &result {
            self.publish_failure(client, &lc, err).instrument(span).await;
        }

        result
    }

    async fn initialize(
        &self,
        client: &dyn KcpClientTrait,
        lc: &LogicalCluster,
        ctx: &RenderContext,
    ) -> Result<bool, ControllerError> {
        // Fetched on every pass so source list changes apply without restarting watches.
        let target = self.target.current().await.map_err(ControllerError::TargetUnavailable)?;
        let owning_cluster = target.logical_cluster().unwrap_or(&self.config_workspace);

        let mut requeue = false;

        for (index, init_source) in target.spec.sources.iter().enumerate() {
            let span = info_span!(
                "source",
                init_target = %self.target.name(),
                source_idx = index,
                source_kind = init_source.kind()
            );

            let source_requeue = async {
                let source = self
                    .sources
                    .resolve(owning_cluster, init_source)
                    .await
                    .map_err(|source| ControllerError::SourceResolve { index, source })?;

                let objects = source
                    .manifests(ctx)
                    .map_err(|source| ControllerError::SourceRender { index, source })?;
                debug!("Source yielded {} manifests", objects.len());

                apply_manifests(client, objects)
                    .await
                    .map_err(|source| ControllerError::SourceApply { index, source })
            }
            .instrument(span.clone())
            .await?;

            // Sources are independent; one that cannot complete yet does not block the others.
            if source_requeue {
                span.in_scope(|| debug!("Source requires requeuing"));
                requeue = true;
            }
        }

        if requeue {
            return Ok(true);
        }

        self.remove_initializer(client, lc).await
    }

    /// Removes our initializer with a write conditional on the resourceVersion
    /// we read. Returns `Ok(true)` if the object changed in the meantime.
    async fn remove_initializer(&self, client: &dyn KcpClientTrait, lc: &LogicalCluster) -> Result<bool, ControllerError> {
        let remaining = lc.initializers_without(&self.initializer);
        if remaining.len() == lc.initializers().len() {
            return Ok(false);
        }

        let mut patch = json!({ "status": { "initializers": remaining } });
        if let Some(rv) = &lc.metadata.resource_version {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }

        debug!(initializer = %self.initializer, "Removing initializer from cluster");
        match client.patch_logical_cluster_status(&lc.name_any(), &patch).await {
            Ok(_) => {
                info!("Cluster successfully initialized");
                Ok(false)
            }
            Err(e) if e.is_conflict() => {
                debug!(error = %e, "LogicalCluster changed while removing initializer, retrying");
                Ok(true)
            }
            Err(e) => Err(ControllerError::RemoveInitializer(e)),
        }
    }

    async fn publish_failure(&self, client: &dyn KcpClientTrait, lc: &LogicalCluster, err: &ControllerError) {
        let event = Event {
            type_: EventType::Warning,
            reason: REASON_RECONCILING_FAILED.to_string(),
            note: Some(format!("Failed to initialize cluster: {err}.")),
            action: "Initializing".to_string(),
            secondary: None,
        };

        if let Err(e) = client.publish_event(&lc.object_ref(&()), &event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initcontroller::InitControllerFactory;
    use crate::test_utils::*;
    use kcp_client::MockKcpClient;
    use std::sync::Arc;

    const OURS: &str = "1ad6g5ktajmkg0wq:my-type";
    const OTHER: &str = "root:other-type";

    const NAMESPACE_AND_CONFIGMAP: &str = "\
apiVersion: v1
kind: Namespace
metadata:
  name: init
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: workspace-info
  namespace: init
data:
  path: {{ .ClusterPath }}
  name: {{ .ClusterName }}
";

    struct Fixture {
        mock: MockKcpClient,
        reconciler: Reconciler,
    }

    impl Fixture {
        fn new(templates: &[(&str, &str)], sources: &[&str]) -> Self {
            let mock = MockKcpClient::new(CONFIG_WORKSPACE);
            mock.add_init_target(create_test_init_target("init-my-type", "uid-1", sources));
            for (name, template) in templates {
                mock.add_init_template(create_test_init_template(name, template));
            }
            mock.for_cluster(DEST_CLUSTER)
                .add_logical_cluster(create_test_logical_cluster(&[OURS, OTHER]));

            let factory = InitControllerFactory::new(Arc::new(mock.clone()), CONFIG_WORKSPACE);
            let provider = InitTargetProvider::new(Arc::new(mock.clone()), "init-my-type");
            let reconciler = factory.create(provider, LogicalClusterInitializer::from(OURS));

            Self { mock, reconciler }
        }

        fn dest(&self) -> MockKcpClient {
            self.mock.for_cluster(DEST_CLUSTER)
        }

        async fn reconcile(&self) -> Result<bool, ControllerError> {
            let request = ClusterRequest {
                cluster: DEST_CLUSTER.to_string(),
                name: crds::LOGICAL_CLUSTER_OBJECT_NAME.to_string(),
            };
            self.reconciler.reconcile(&self.dest(), &request).await
        }

        fn initializers(&self) -> Vec<String> {
            self.dest()
                .logical_cluster(crds::LOGICAL_CLUSTER_OBJECT_NAME)
                .map(|lc| lc.initializers().iter().map(ToString::to_string).collect())
                .unwrap_or_default()
        }
    }

    fn config_map(name: &str) -> String {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: default\n")
    }

    #[tokio::test]
    async fn test_end_to_end_initializes_cluster() {
        let fx = Fixture::new(&[("basics", NAMESPACE_AND_CONFIGMAP)], &["basics"]);

        let requeue = fx.reconcile().await.expect("pass succeeds");
        assert!(!requeue);

        let created = fx.dest().created_objects();
        assert_eq!(fx.dest().created_kinds(), vec!["Namespace", "ConfigMap"]);
        assert_eq!(created[1].data["data"]["path"], DEST_PATH);
        assert_eq!(created[1].data["data"]["name"], DEST_CLUSTER);

        assert_eq!(fx.initializers(), vec![OTHER.to_string()]);
        assert!(fx.mock.events().is_empty());
    }

    #[tokio::test]
    async fn test_partial_retry_keeps_marker_but_applies_other_sources() {
        let widget = "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n";
        let fx = Fixture::new(
            &[("one", &config_map("one")), ("two", widget), ("three", &config_map("three"))],
            &["one", "two", "three"],
        );
        fx.mock.mark_kind_unknown("Widget");

        assert!(fx.reconcile().await.expect("no hard error"));

        let names: Vec<_> = fx
            .dest()
            .created_objects()
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect();
        assert_eq!(names, vec!["one", "three"]);
        assert_eq!(fx.initializers(), vec![OURS.to_string(), OTHER.to_string()]);

        // Once the kind is served the next pass finishes the job.
        fx.mock.recognize_kind("Widget");
        assert!(!fx.reconcile().await.expect("pass succeeds"));
        assert_eq!(fx.dest().created_kinds(), vec!["ConfigMap", "ConfigMap", "Widget"]);
        assert_eq!(fx.initializers(), vec![OTHER.to_string()]);
    }

    #[tokio::test]
    async fn test_failing_source_aborts_pass_and_records_event() {
        let fx = Fixture::new(
            &[("one", &config_map("one")), ("three", &config_map("three"))],
            &["one", "missing", "three"],
        );

        let err = fx.reconcile().await.expect_err("missing template");
        assert!(matches!(err, ControllerError::SourceResolve { index: 1, .. }), "{err}");
        assert!(err.to_string().starts_with("failed to initialize source #1"), "{err}");

        let names: Vec<_> = fx
            .dest()
            .created_objects()
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect();
        assert_eq!(names, vec!["one"]);
        assert_eq!(fx.initializers(), vec![OURS.to_string(), OTHER.to_string()]);

        let events = fx.mock.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].cluster, DEST_CLUSTER);
        assert_eq!(events[0].object_name, crds::LOGICAL_CLUSTER_OBJECT_NAME);
        assert_eq!(events[0].reason, REASON_RECONCILING_FAILED);
        assert!(events[0].warning);
        assert!(events[0].note.starts_with("Failed to initialize cluster: failed to initialize source #1"));
        assert!(events[0].note.ends_with('.'));
    }

    #[tokio::test]
    async fn test_render_and_apply_failures_name_their_stage() {
        let fx = Fixture::new(&[("bad", "{{ .Unknown }}")], &["bad"]);
        let err = fx.reconcile().await.expect_err("undefined variable");
        assert!(matches!(err, ControllerError::SourceRender { index: 0, .. }), "{err}");

        let fx = Fixture::new(&[("cm", &config_map("x"))], &["cm"]);
        fx.mock.reject_kind("ConfigMap");
        let err = fx.reconcile().await.expect_err("rejected object");
        assert!(matches!(err, ControllerError::SourceApply { index: 0, .. }), "{err}");
        assert_eq!(fx.initializers(), vec![OURS.to_string(), OTHER.to_string()]);
    }

    #[tokio::test]
    async fn test_cluster_without_our_initializer_is_ignored() {
        let fx = Fixture::new(&[("basics", NAMESPACE_AND_CONFIGMAP)], &["basics"]);
        fx.dest().add_logical_cluster(create_test_logical_cluster(&[OTHER]));

        assert!(!fx.reconcile().await.expect("no-op"));
        assert!(fx.dest().created_objects().is_empty());
        assert_eq!(fx.mock.status_patch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_cluster_is_ignored() {
        let fx = Fixture::new(&[], &[]);
        let request = ClusterRequest {
            cluster: "gone".to_string(),
            name: crds::LOGICAL_CLUSTER_OBJECT_NAME.to_string(),
        };
        let client = fx.mock.for_cluster("gone");
        assert!(!fx.reconciler.reconcile(&client, &request).await.expect("no-op"));
    }

    #[tokio::test]
    async fn test_target_without_sources_only_removes_marker() {
        let fx = Fixture::new(&[], &[]);
        assert!(!fx.reconcile().await.expect("pass succeeds"));
        assert_eq!(fx.initializers(), vec![OTHER.to_string()]);
        assert_eq!(fx.mock.status_patch_count(), 1);
    }

    #[tokio::test]
    async fn test_conflict_on_marker_removal_requeues_without_event() {
        let fx = Fixture::new(&[("cm", &config_map("x"))], &["cm"]);
        fx.mock.inject_status_conflicts(1);

        assert!(fx.reconcile().await.expect("conflict is not an error"));
        assert_eq!(fx.initializers(), vec![OURS.to_string(), OTHER.to_string()]);
        assert!(fx.mock.events().is_empty());

        assert!(!fx.reconcile().await.expect("second pass succeeds"));
        assert_eq!(fx.initializers(), vec![OTHER.to_string()]);
    }

    #[tokio::test]
    async fn test_target_changes_apply_on_next_pass() {
        let fx = Fixture::new(&[("one", &config_map("one")), ("two", &config_map("two"))], &["one"]);
        fx.mock.mark_kind_unknown("ConfigMap");
        assert!(fx.reconcile().await.expect("retry"));

        fx.mock
            .add_init_target(create_test_init_target("init-my-type", "uid-1", &["one", "two"]));
        fx.mock.recognize_kind("ConfigMap");
        assert!(!fx.reconcile().await.expect("pass succeeds"));

        let names: Vec<_> = fx
            .dest()
            .created_objects()
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_deleted_target_is_an_error() {
        let fx = Fixture::new(&[], &[]);
        fx.mock.remove_init_target("init-my-type");

        let err = fx.reconcile().await.expect_err("target is gone");
        assert!(matches!(err, ControllerError::TargetUnavailable(_)), "{err}");
        assert_eq!(fx.mock.events().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_annotation_is_an_error() {
        let fx = Fixture::new(&[], &[]);
        let mut lc = create_test_logical_cluster(&[OURS]);
        lc.annotations_mut().remove(crds::LOGICAL_CLUSTER_PATH_ANNOTATION);
        fx.dest().add_logical_cluster(lc);

        let err = fx.reconcile().await.expect_err("no path");
        assert!(matches!(err, ControllerError::MissingAnnotation(..)), "{err}");
    }
}
