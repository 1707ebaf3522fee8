//! kcp client errors

use thiserror::Error;

/// Errors that can occur when talking to a kcp workspace
#[derive(Debug, Error)]
pub enum KcpError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The object was modified concurrently (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The workspace does not (yet) serve the object's kind
    #[error("No kind match: {0}")]
    NoKindMatch(String),

    /// The object cannot be sent as-is (missing apiVersion, kind, name, ...)
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Client configuration is unusable (bad URL, missing cluster, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KcpError {
    /// Sorts a `kube::Error` into the variants callers branch on.
    ///
    /// `what` describes the object involved and ends up in the message.
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => {
                KcpError::NotFound(format!("{what}: {}", resp.message))
            }
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                KcpError::AlreadyExists(format!("{what}: {}", resp.message))
            }
            kube::Error::Api(resp) if resp.code == 409 => {
                KcpError::Conflict(format!("{what}: {}", resp.message))
            }
            _ => KcpError::Kube(err),
        }
    }

    /// Whether the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KcpError::NotFound(_))
    }

    /// Whether the error means the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, KcpError::AlreadyExists(_))
    }

    /// Whether the error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, KcpError::Conflict(_))
    }

    /// Whether the error means the kind is not (yet) known to the workspace.
    pub fn is_no_kind_match(&self) -> bool {
        matches!(self, KcpError::NoKindMatch(_))
    }
}
