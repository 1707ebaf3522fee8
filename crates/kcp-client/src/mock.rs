//! Mock KcpClient for unit testing
//!
//! This module provides an in-memory implementation of `KcpClientTrait` and
//! `ClusterClientFactory` so reconcilers can be tested without a running kcp.
//! All clients handed out by one mock share the same store; each one is
//! scoped to a cluster the same way real clients are.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crds::{InitTarget, InitTemplate, LogicalCluster, WorkspaceType};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;
use kube::runtime::events::{Event, EventType};
use kube::ResourceExt;
use serde_json::Value;

use crate::error::KcpError;
use crate::kcp_trait::{ClusterClientFactory, KcpClientTrait};

/// An event published through the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Cluster the event was published in
    pub cluster: String,
    /// Name of the object the event is about
    pub object_name: String,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable note
    pub note: String,
    /// Whether the event is a Warning (as opposed to Normal)
    pub warning: bool,
}

/// Object identity inside one cluster: (cluster, apiVersion, kind, namespace, name)
type ObjectKey = (String, String, String, String, String);

#[derive(Default)]
struct MockState {
    init_targets: HashMap<(String, String), InitTarget>,
    init_templates: HashMap<(String, String), InitTemplate>,
    workspace_types: HashMap<(String, String), WorkspaceType>,
    logical_clusters: HashMap<(String, String), LogicalCluster>,
    existing: HashSet<ObjectKey>,
    created: Vec<(String, DynamicObject)>,
    unknown_kinds: HashSet<String>,
    rejected_kinds: HashSet<String>,
    pending_conflicts: usize,
    status_patches: usize,
    events: Vec<RecordedEvent>,
    next_resource_version: u64,
}

/// Mock KcpClient for testing
#[derive(Clone)]
pub struct MockKcpClient {
    cluster: String,
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockKcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKcpClient")
            .field("cluster", &self.cluster)
            .finish_non_exhaustive()
    }
}

impl MockKcpClient {
    /// Create a new mock client scoped to `cluster`
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            state: Arc::new(Mutex::new(MockState {
                next_resource_version: 1,
                ..Default::default()
            })),
        }
    }

    /// Client for another cluster sharing this mock's store
    pub fn for_cluster(&self, cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self, name: &str) -> (String, String) {
        (self.cluster.clone(), name.to_string())
    }

    /// Add an InitTarget to this client's cluster (for test setup)
    pub fn add_init_target(&self, target: InitTarget) {
        let key = self.key(&target.name_any());
        self.state().init_targets.insert(key, target);
    }

    /// Remove an InitTarget from this client's cluster
    pub fn remove_init_target(&self, name: &str) {
        let key = self.key(name);
        self.state().init_targets.remove(&key);
    }

    /// Add an InitTemplate to this client's cluster (for test setup)
    pub fn add_init_template(&self, template: InitTemplate) {
        let key = self.key(&template.name_any());
        self.state().init_templates.insert(key, template);
    }

    /// Add a WorkspaceType to this client's cluster (for test setup)
    pub fn add_workspace_type(&self, workspace_type: WorkspaceType) {
        let key = self.key(&workspace_type.name_any());
        self.state().workspace_types.insert(key, workspace_type);
    }

    /// Add a LogicalCluster to this client's cluster (for test setup)
    ///
    /// A missing resourceVersion is filled in.
    pub fn add_logical_cluster(&self, mut cluster: LogicalCluster) {
        let mut state = self.state();
        if cluster.metadata.resource_version.is_none() {
            cluster.metadata.resource_version = Some(state.next_resource_version.to_string());
            state.next_resource_version += 1;
        }
        state.logical_clusters.insert(self.key(&cluster.name_any()), cluster);
    }

    /// Current state of a LogicalCluster in this client's cluster
    pub fn logical_cluster(&self, name: &str) -> Option<LogicalCluster> {
        self.state().logical_clusters.get(&self.key(name)).cloned()
    }

    /// Mark an object as already present, so creating it reports AlreadyExists
    pub fn add_existing_object(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) {
        let key = (
            self.cluster.clone(),
            api_version.to_string(),
            kind.to_string(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        self.state().existing.insert(key);
    }

    /// Make the mock report `kind` as not served, in every cluster
    pub fn mark_kind_unknown(&self, kind: &str) {
        self.state().unknown_kinds.insert(kind.to_string());
    }

    /// Make a previously unknown `kind` servable again
    pub fn recognize_kind(&self, kind: &str) {
        self.state().unknown_kinds.remove(kind);
    }

    /// Make creating any object of `kind` fail with a hard error
    pub fn reject_kind(&self, kind: &str) {
        self.state().rejected_kinds.insert(kind.to_string());
    }

    /// Fail the next `count` status patches with a conflict
    pub fn inject_status_conflicts(&self, count: usize) {
        self.state().pending_conflicts = count;
    }

    /// Number of status patches that were attempted
    pub fn status_patch_count(&self) -> usize {
        self.state().status_patches
    }

    /// Objects created in this client's cluster, in creation order
    pub fn created_objects(&self) -> Vec<DynamicObject> {
        self.state()
            .created
            .iter()
            .filter(|(cluster, _)| *cluster == self.cluster)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Kinds created in this client's cluster, in creation order
    pub fn created_kinds(&self) -> Vec<String> {
        self.created_objects()
            .iter()
            .filter_map(|obj| obj.types.as_ref().map(|t| t.kind.clone()))
            .collect()
    }

    /// Every event published through any client of this mock
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state().events.clone()
    }
}

fn not_found(kind: &str, cluster: &str, name: &str) -> KcpError {
    KcpError::NotFound(format!("{kind} {name} in cluster {cluster}"))
}

/// RFC 7386 JSON merge patch.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, Value::Object(_)) => {
            *target = Value::Object(serde_json::Map::new());
            merge(target, patch);
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait::async_trait]
impl KcpClientTrait for MockKcpClient {
    fn cluster(&self) -> &str {
        &self.cluster
    }

    async fn get_init_target(&self, name: &str) -> Result<InitTarget, KcpError> {
        self.state()
            .init_targets
            .get(&self.key(name))
            .cloned()
            .ok_or_else(|| not_found("InitTarget", &self.cluster, name))
    }

    async fn get_init_template(&self, name: &str) -> Result<InitTemplate, KcpError> {
        self.state()
            .init_templates
            .get(&self.key(name))
            .cloned()
            .ok_or_else(|| not_found("InitTemplate", &self.cluster, name))
    }

    async fn get_workspace_type(&self, name: &str) -> Result<WorkspaceType, KcpError> {
        self.state()
            .workspace_types
            .get(&self.key(name))
            .cloned()
            .ok_or_else(|| not_found("WorkspaceType", &self.cluster, name))
    }

    async fn get_logical_cluster(&self, name: &str) -> Result<Option<LogicalCluster>, KcpError> {
        Ok(self.logical_cluster(name))
    }

    async fn patch_logical_cluster_status(&self, name: &str, patch: &Value) -> Result<LogicalCluster, KcpError> {
        let key = self.key(name);
        let mut state = self.state();
        state.status_patches += 1;

        let current = state
            .logical_clusters
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found("LogicalCluster", &self.cluster, name))?;

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(KcpError::Conflict(format!("LogicalCluster {name}: injected conflict")));
        }

        let expected = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str);
        if let Some(expected) = expected
            && current.metadata.resource_version.as_deref() != Some(expected)
        {
            return Err(KcpError::Conflict(format!(
                "LogicalCluster {name}: resourceVersion {expected} is stale"
            )));
        }

        // Only the status subresource is writable through this call.
        let mut status_patch = serde_json::Map::new();
        if let Some(status) = patch.get("status") {
            status_patch.insert("status".to_string(), status.clone());
        }

        let mut merged = serde_json::to_value(&current)?;
        merge(&mut merged, &Value::Object(status_patch));
        let mut updated: LogicalCluster = serde_json::from_value(merged)?;
        updated.metadata.resource_version = Some(state.next_resource_version.to_string());
        state.next_resource_version += 1;

        state.logical_clusters.insert(key, updated.clone());
        Ok(updated)
    }

    async fn create_object(&self, object: &DynamicObject) -> Result<(), KcpError> {
        let types = object
            .types
            .as_ref()
            .ok_or_else(|| KcpError::InvalidObject("object has no apiVersion/kind".to_string()))?;
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| KcpError::InvalidObject(format!("{} without metadata.name", types.kind)))?;

        let mut state = self.state();
        if state.unknown_kinds.contains(&types.kind) {
            return Err(KcpError::NoKindMatch(format!("{} {}", types.api_version, types.kind)));
        }
        if state.rejected_kinds.contains(&types.kind) {
            return Err(KcpError::InvalidObject(format!("{} {name}: rejected", types.kind)));
        }

        let key = (
            self.cluster.clone(),
            types.api_version.clone(),
            types.kind.clone(),
            object.metadata.namespace.clone().unwrap_or_default(),
            name.clone(),
        );
        if !state.existing.insert(key) {
            return Err(KcpError::AlreadyExists(format!("{} {name}", types.kind)));
        }

        state.created.push((self.cluster.clone(), object.clone()));
        Ok(())
    }

    async fn publish_event(&self, reference: &ObjectReference, event: &Event) -> Result<(), KcpError> {
        self.state().events.push(RecordedEvent {
            cluster: self.cluster.clone(),
            object_name: reference.name.clone().unwrap_or_default(),
            reason: event.reason.clone(),
            note: event.note.clone().unwrap_or_default(),
            warning: matches!(event.type_, EventType::Warning),
        });
        Ok(())
    }
}

impl ClusterClientFactory for MockKcpClient {
    fn cluster(&self, cluster: &str) -> Result<Arc<dyn KcpClientTrait>, KcpError> {
        if cluster.is_empty() {
            return Err(KcpError::InvalidConfig("empty cluster name".to_string()));
        }
        Ok(Arc::new(self.for_cluster(cluster)))
    }
}
