//! Workspace URL handling
//!
//! kcp serves each logical cluster under `/clusters/<name>`. A REST config
//! pointing at any workspace can be turned into one pointing at another by
//! replacing that trailing segment.

use crate::error::KcpError;

const CLUSTERS_SEGMENT: &str = "/clusters/";

/// Removes a trailing `/clusters/<name>` (and trailing slashes) from a URL.
pub fn strip_cluster(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind(CLUSTERS_SEGMENT) {
        Some(idx) if !trimmed[idx + CLUSTERS_SEGMENT.len()..].contains('/') => {
            trimmed[..idx].trim_end_matches('/')
        }
        _ => trimmed,
    }
}

/// Points `url` at `cluster`, replacing any cluster it already targets.
///
/// `cluster` may be a logical cluster name, a workspace path
/// (`root:org:team`) or `*` for the wildcard endpoint of virtual workspaces.
pub fn retarget_url(url: &str, cluster: &str) -> Result<String, KcpError> {
    if cluster.is_empty() {
        return Err(KcpError::InvalidConfig("cluster name must not be empty".to_string()));
    }
    if cluster.contains('/') {
        return Err(KcpError::InvalidConfig(format!("invalid cluster name {cluster:?}")));
    }

    Ok(format!("{}{CLUSTERS_SEGMENT}{cluster}", strip_cluster(url)))
}

/// Retargets a kube config at `cluster`.
pub fn retarget_config(config: &kube::Config, cluster: &str) -> Result<kube::Config, KcpError> {
    let url = retarget_url(&config.cluster_url.to_string(), cluster)?;

    let mut retargeted = config.clone();
    retargeted.cluster_url = url
        .parse()
        .map_err(|e| KcpError::InvalidConfig(format!("invalid cluster URL {url:?}: {e}")))?;

    Ok(retargeted)
}
