//! Apply order for manifests
//!
//! Objects are sorted so that they can be created one after another:
//!
//! 1. CustomResourceDefinitions
//! 2. APIExports
//! 3. APIBindings
//! 4. Namespaces
//! 5. everything else
//!
//! Some delay may still be needed between creating a CRD and creating
//! objects of its kind; the applier reports that case separately.

use kube::api::DynamicObject;

/// Lowercase `kind.group` of the kinds that must come first, in order.
const WEIGHTS: [&str; 4] = [
    "customresourcedefinition.apiextensions.k8s.io",
    "apiexport.apis.kcp.io",
    "apibinding.apis.kcp.io",
    "namespace",
];

/// Lowercase `kind.group` (just `kind` for the core group).
fn group_kind(object: &DynamicObject) -> String {
    let Some(types) = object.types.as_ref() else {
        return String::new();
    };

    let group = match types.api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    };

    if group.is_empty() {
        types.kind.to_lowercase()
    } else {
        format!("{}.{}", types.kind, group).to_lowercase()
    }
}

fn weight(object: &DynamicObject) -> usize {
    let gk = group_kind(object);
    WEIGHTS.iter().position(|w| *w == gk).unwrap_or(WEIGHTS.len())
}

/// Sorts `objects` in place into apply order. Objects of equal weight keep
/// their relative order.
pub fn sort_by_hierarchy(objects: &mut [DynamicObject]) {
    objects.sort_by_cached_key(weight);
}
