//! Manifest applier
//!
//! Creates objects in a workspace in hierarchy order. The agent only ever
//! bootstraps workspaces, so objects that already exist are left alone and
//! there is no update or drift handling.

use kcp_client::{KcpClientTrait, KcpError};
use kube::api::DynamicObject;
use tracing::{debug, info};

use super::sort::sort_by_hierarchy;

/// `namespace/name`, or just `name` for cluster-scoped objects.
pub fn object_key(object: &DynamicObject) -> String {
    let namespace = object.metadata.namespace.as_deref().unwrap_or_default();
    let name = object.metadata.name.as_deref().unwrap_or_default();
    format!("{namespace}/{name}").trim_start_matches('/').to_string()
}

fn object_gvk(object: &DynamicObject) -> String {
    object
        .types
        .as_ref()
        .map(|t| format!("{}, Kind={}", t.api_version, t.kind))
        .unwrap_or_default()
}

/// Sorts `objects` and creates them one by one through `client`.
///
/// Returns `Ok(true)` when the workspace does not serve one of the kinds
/// yet (typically a CRD created earlier in the same batch is still being
/// established); the remaining objects are skipped and the caller should
/// try again shortly. Any other failure aborts the batch with an error.
pub async fn apply_manifests(client: &dyn KcpClientTrait, mut objects: Vec<DynamicObject>) -> Result<bool, KcpError> {
    sort_by_hierarchy(&mut objects);

    for object in &objects {
        let obj_key = object_key(object);
        let obj_gvk = object_gvk(object);
        debug!(obj_key = %obj_key, obj_gvk = %obj_gvk, "Applying object");

        match client.create_object(object).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(obj_key = %obj_key, "Object already exists");
            }
            Err(e) if e.is_no_kind_match() => {
                info!(obj_key = %obj_key, obj_gvk = %obj_gvk, "Kind not served yet, will retry");
                return Ok(true);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(false)
}
