//! InitTemplate CRD
//!
//! Holds a single template whose rendering yields the manifests to create.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "initialization.kcp.io",
    version = "v1alpha1",
    kind = "InitTemplate",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InitTemplateSpec {
    /// Template text; renders to a multi-document YAML stream
    pub template: String,
}
