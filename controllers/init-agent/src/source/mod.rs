//! Init sources
//!
//! An `InitSource` in an InitTarget is a reference; `SourceFactory`
//! resolves it into a `ManifestSource` that can produce the manifests for a
//! given workspace. Supporting a new kind of source means adding a variant
//! to `InitSource`, one arm in `SourceFactory::resolve` and one new
//! `ManifestSource` implementation.

pub mod filters;
pub mod template;

use std::sync::Arc;

use crds::InitSource;
use kcp_client::{ClusterClientFactory, KcpError};
use kube::api::DynamicObject;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::manifest::{parse_manifests, ManifestError};

pub use template::TemplateSource;

/// Errors resolving or rendering a source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing object could not be fetched
    #[error(transparent)]
    Kcp(#[from] KcpError),

    /// The template failed to compile or execute
    #[error("template error: {0:#}")]
    Template(#[from] minijinja::Error),

    /// The rendered output is not a valid manifest stream
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// What a source gets to know about the workspace being initialized.
///
/// Field names are exposed to templates as-is (`ClusterName`, `ClusterPath`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RenderContext {
    /// Internal logical cluster name, e.g. `34hg2j4gh24jdfgf`
    pub cluster_name: String,
    /// Workspace path, e.g. `root:customer:projectx`
    pub cluster_path: String,
}

/// Produces the manifests of one source for a workspace.
pub trait ManifestSource: Send + Sync {
    /// Renders the raw multi-document YAML stream.
    fn render(&self, ctx: &RenderContext) -> Result<String, SourceError>;

    /// Renders and parses the manifests.
    fn manifests(&self, ctx: &RenderContext) -> Result<Vec<DynamicObject>, SourceError> {
        let rendered = self.render(ctx)?;
        Ok(parse_manifests(&rendered)?)
    }
}

/// Resolves `InitSource` references into `ManifestSource`s.
#[derive(Clone)]
pub struct SourceFactory {
    clusters: Arc<dyn ClusterClientFactory>,
}

impl std::fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFactory").finish_non_exhaustive()
    }
}

impl SourceFactory {
    /// `clusters` is used to reach the workspace that holds backing objects.
    pub fn new(clusters: Arc<dyn ClusterClientFactory>) -> Self {
        Self { clusters }
    }

    /// Resolves `source`, fetching backing objects from `cluster` (the
    /// workspace the InitTarget lives in).
    pub async fn resolve(&self, cluster: &str, source: &InitSource) -> Result<Box<dyn ManifestSource>, SourceError> {
        match source {
            InitSource::Template(template) => {
                let client = self.clusters.cluster(cluster)?;
                let init_template = client.get_init_template(&template.name).await?;
                debug!(cluster, template = %template.name, "Resolved InitTemplate");

                Ok(Box::new(TemplateSource::from_init_template(&init_template)?))
            }
        }
    }
}
