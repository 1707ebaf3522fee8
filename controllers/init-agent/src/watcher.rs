//! Kubernetes resource watchers.
//!
//! Both the InitTarget supervisor and every per-shard LogicalCluster watch
//! run through `watch_resource()`, which drives a `kube_runtime::Controller`
//! and stops it when a cancellation token fires.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use kube::Resource;
use kube_runtime::controller::{self, Action, Config as ControllerConfig};
use kube_runtime::Controller;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControllerError;

/// Runs `controller` until `token` is cancelled.
///
/// Returns `Ok(())` after cancellation. If the controller stream ends on its
/// own the watch is considered broken and an error is returned.
pub async fn watch_resource<K, Ctx, F, Fut, P>(
    controller: Controller<K>,
    concurrency: u16,
    reconcile: F,
    error_policy: P,
    context: Arc<Ctx>,
    resource_name: &str,
    token: CancellationToken,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    Ctx: Send + Sync + 'static,
    F: FnMut(Arc<K>, Arc<Ctx>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
    P: Fn(Arc<K>, &ControllerError, Arc<Ctx>) -> Action + Send + Sync + 'static,
{
    info!("Starting {} watcher", resource_name);

    let controller_config = ControllerConfig::default().concurrency(concurrency);

    let run = controller
        .with_config(controller_config)
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj),
                // Already reported by the error policy
                Err(controller::Error::ReconcilerFailed(_, obj)) => {
                    debug!("Reconcile of {} {} failed", resource_name, obj);
                }
                Err(e) => warn!("Controller error for {}: {}", resource_name, e),
            }
        });

    tokio::select! {
        () = run => Err(ControllerError::Watch(format!("{resource_name} watch ended unexpectedly"))),
        () = token.cancelled() => {
            info!("Stopped {} watcher", resource_name);
            Ok(())
        }
    }
}
