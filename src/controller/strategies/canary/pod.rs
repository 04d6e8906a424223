//! Pod-count canary: traffic follows the ratio of canary to stable pods

use super::{canary_replica_count, new_baseline_resource, new_canary_resource};
use crate::controller::rollout::Context;
use crate::controller::strategies::{apply_objects, fetch_existing, StrategyError};
use crate::manifest::transform::replica_count;
use crate::manifest::ManifestObject;
use tracing::{debug, info};

/// Apply a canary (and baseline, when a stable workload exists) per workload
///
/// The stable workload keeps its own name, so the baseline is derived from
/// the object currently running under the input name. Everything that is
/// not a workload is applied unchanged.
///
/// # Returns
/// Every object applied, canaries and baselines included
pub async fn deploy_pod_canary(
    ctx: &Context,
    objects: &[ManifestObject],
    percentage: i32,
) -> Result<Vec<ManifestObject>, StrategyError> {
    let mut deployed = Vec::with_capacity(objects.len());

    for object in objects {
        if !object.kind().is_deployment_entity() {
            deployed.push(object.clone());
            continue;
        }

        let replicas = canary_replica_count(replica_count(object), percentage);
        deployed.push(new_canary_resource(object, Some(replicas)));

        match fetch_existing(ctx, object.kind(), object.name()).await? {
            Some(stable) => {
                debug!(resource = %object, replicas, "Stable workload found, adding baseline");
                deployed.push(new_baseline_resource(&stable, object.name(), Some(replicas)));
            }
            None => debug!(resource = %object, "No stable workload, deploying canary only"),
        }
    }

    info!(objects = deployed.len(), percentage, "Applying pod canary");
    apply_objects(ctx, &deployed).await?;
    Ok(deployed)
}
