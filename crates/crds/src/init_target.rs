//! InitTarget CRD
//!
//! Declares which workspaces (by WorkspaceType) get initialized, and with
//! which ordered list of sources.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::kcp::LOGICAL_CLUSTER_ANNOTATION;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "initialization.kcp.io",
    version = "v1alpha1",
    kind = "InitTarget",
    printcolumn = r#"{"name":"WSType Cluster","type":"string","jsonPath":".spec.workspaceTypeRef.path"}"#,
    printcolumn = r#"{"name":"WSType","type":"string","jsonPath":".spec.workspaceTypeRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InitTargetSpec {
    /// The WorkspaceType whose new workspaces this target initializes
    #[serde(rename = "workspaceTypeRef")]
    pub workspace_type_reference: WorkspaceTypeReference,

    /// Sources applied in list order to every workspace being initialized
    #[serde(default)]
    pub sources: Vec<InitSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceTypeReference {
    /// Workspace path of the WorkspaceType; empty means "same workspace as the InitTarget"
    #[serde(default)]
    pub path: String,

    /// Name of the WorkspaceType
    pub name: String,
}

/// One unit of bootstrap content.
///
/// Serialized externally tagged, so `{"template": {"name": "foo"}}` on the
/// wire. Every new kind of source becomes one more variant here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InitSource {
    /// Manifests rendered from an `InitTemplate`
    Template(TemplateInitSource),
}

impl InitSource {
    /// Short name of the variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            InitSource::Template(_) => "template",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInitSource {
    /// Name of the (cluster-scoped) InitTemplate
    pub name: String,
}

impl InitTarget {
    /// Stable identity used to key running controllers.
    ///
    /// The UID changes on delete/recreate, which matches the lifetime of one
    /// running controller. Falls back to the name for objects without a UID.
    pub fn identity_key(&self) -> String {
        self.uid().unwrap_or_else(|| self.name_any())
    }

    /// The logical cluster this InitTarget lives in, if kcp told us.
    pub fn logical_cluster(&self) -> Option<&str> {
        self.annotations()
            .get(LOGICAL_CLUSTER_ANNOTATION)
            .map(String::as_str)
    }
}
