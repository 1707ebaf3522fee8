//! Controller-specific error types.
//!
//! This module defines the errors raised by the init-agent's controllers
//! that are not covered by upstream library errors.

use kcp_client::KcpError;
use kube::Error as KubeError;
use kube_runtime::finalizer;
use thiserror::Error;

use crate::source::SourceError;

/// Errors that can occur in the Init Agent.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// kcp API error
    #[error(transparent)]
    Kcp(#[from] KcpError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The InitTarget could not be fetched
    #[error("failed to get InitTarget: {0}")]
    TargetUnavailable(#[source] KcpError),

    /// The WorkspaceType of an InitTarget could not be used
    #[error("failed to retrieve WorkspaceType: {0}")]
    WorkspaceType(#[source] KcpError),

    /// The WorkspaceType exists but cannot drive initialization
    #[error("WorkspaceType {name} {reason}")]
    InvalidWorkspaceType {
        /// Name of the WorkspaceType
        name: String,
        /// What is wrong with it
        reason: &'static str,
    },

    /// The initializer could not be removed from a LogicalCluster
    #[error("failed to remove initializer: {0}")]
    RemoveInitializer(#[source] KcpError),

    /// A source could not be resolved
    #[error("failed to initialize source #{index}: {source}")]
    SourceResolve {
        /// Position of the source in the InitTarget
        index: usize,
        /// Underlying failure
        #[source]
        source: SourceError,
    },

    /// A source could not be rendered
    #[error("failed to render source #{index}: {source}")]
    SourceRender {
        /// Position of the source in the InitTarget
        index: usize,
        /// Underlying failure
        #[source]
        source: SourceError,
    },

    /// Rendered manifests could not be applied
    #[error("failed to apply source #{index}: {source}")]
    SourceApply {
        /// Position of the source in the InitTarget
        index: usize,
        /// Underlying failure
        #[source]
        source: KcpError,
    },

    /// The LogicalCluster is missing information the agent relies on
    #[error("LogicalCluster {0} has no {1} annotation")]
    MissingAnnotation(String, &'static str),

    /// Finalizer handling on an InitTarget failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
