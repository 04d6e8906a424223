//! Canary deployment strategy
//!
//! A reduced-replica canary of the new manifests runs next to the stable
//! workload, together with a baseline copy of the current stable spec so the
//! two can be compared like for like. Traffic is apportioned either by pod
//! count or by an SMI TrafficSplit.

pub mod pod;
pub mod smi;

use super::{apply_objects, delete_objects, DeploymentStrategyHandler, StrategyError};
use crate::controller::rollout::{
    check_manifest_stability, Context, TrafficSplitMethod, STABILITY_KINDS,
};
use crate::manifest::labels::{suffixed_name, VersionLabel, CANARY_VERSION_LABEL};
use crate::manifest::transform::{
    get_resources, replica_count, set_replica_count, update_object_annotations,
    update_object_labels, update_selector_labels, update_spec_labels,
};
use crate::manifest::{ManifestObject, ResourceIdentifier, ResourceKind};
use async_trait::async_trait;
use tracing::{debug, info};

/// Canary strategy handler
///
/// - Pod method: canary and baseline share the stable workload's service
/// - SMI method: workloads move to `-stable`/`-baseline`/`-canary` names with
///   one service and one TrafficSplit backend each
pub struct CanaryStrategyHandler {
    pub traffic_split_method: TrafficSplitMethod,
}

#[async_trait]
impl DeploymentStrategyHandler for CanaryStrategyHandler {
    fn name(&self) -> &'static str {
        "canary"
    }

    async fn deploy(
        &self,
        objects: &[ManifestObject],
        ctx: &Context,
    ) -> Result<Vec<ManifestObject>, StrategyError> {
        let percentage = ctx.config.canary_percentage()?;
        info!(
            method = %self.traffic_split_method,
            percentage,
            "Deploying canary"
        );
        match self.traffic_split_method {
            TrafficSplitMethod::Pod => pod::deploy_pod_canary(ctx, objects, percentage).await,
            TrafficSplitMethod::Smi => {
                smi::deploy_smi_canary(ctx, objects, percentage, false).await
            }
        }
    }

    async fn promote(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError> {
        let percentage = ctx.config.canary_percentage()?;

        let include_services = match self.traffic_split_method {
            TrafficSplitMethod::Pod => {
                info!("Promoting canary: applying input manifests as stable");
                let stable: Vec<ManifestObject> = objects
                    .iter()
                    .map(|object| {
                        if object.kind().is_deployment_entity() {
                            mark_resource_as_stable(object)
                        } else {
                            object.clone()
                        }
                    })
                    .collect();
                apply_objects(ctx, &stable).await?;
                check_stability(ctx, &stable).await?;
                false
            }
            TrafficSplitMethod::Smi => {
                info!("Promoting canary: redirecting traffic to canary");
                smi::redirect_traffic_to_canary(ctx, objects).await?;

                info!("Promoting canary: deploying stable workloads");
                let deployed = smi::deploy_smi_canary(ctx, objects, percentage, true).await?;
                check_stability(ctx, &deployed).await?;

                info!("Promoting canary: redirecting traffic to stable");
                smi::redirect_traffic_to_stable(ctx, objects).await?;
                true
            }
        };

        info!("Deleting canary and baseline workloads");
        delete_canary_deployment(ctx, objects, include_services).await;
        Ok(())
    }

    async fn reject(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError> {
        let include_services = self.traffic_split_method == TrafficSplitMethod::Smi;
        if include_services {
            info!("Rejecting canary: redirecting traffic to stable");
            smi::redirect_traffic_to_stable(ctx, objects).await?;
        }

        info!("Deleting canary and baseline workloads");
        delete_canary_deployment(ctx, objects, include_services).await;
        Ok(())
    }

    fn supports_promotion(&self) -> bool {
        true
    }
}

async fn check_stability(ctx: &Context, deployed: &[ManifestObject]) -> Result<(), StrategyError> {
    let resources = get_resources(deployed, STABILITY_KINDS, &ctx.config.namespace);
    check_manifest_stability(ctx, &resources).await?;
    Ok(())
}

/// Canary replica count for a stable replica count and a traffic percentage
///
/// `round(replicas * percentage / 100)`, never below 1.
///
/// # Example
/// ```ignore
/// assert_eq!(canary_replica_count(10, 25), 3);
/// assert_eq!(canary_replica_count(1, 10), 1);
/// ```
pub fn canary_replica_count(replicas: i32, percentage: i32) -> i32 {
    let scaled = i64::from(replicas.max(0)) * i64::from(percentage.clamp(0, 100));
    let rounded = (scaled + 50) / 100;
    i32::try_from(rounded).unwrap_or(i32::MAX).max(1)
}

/// Whether the object already carries `workflow/version: stable`
pub fn is_resource_marked_as_stable(object: &ManifestObject) -> bool {
    object
        .labels()
        .get(CANARY_VERSION_LABEL)
        .is_some_and(|v| v == VersionLabel::Stable.as_str())
}

/// Copy of the object labelled stable; already-stable objects come back unchanged
pub fn mark_resource_as_stable(object: &ManifestObject) -> ManifestObject {
    let mut stable = object.clone();
    if !is_resource_marked_as_stable(object) {
        add_canary_labels_and_annotations(&mut stable, VersionLabel::Stable);
    }
    stable
}

/// Put the version label on metadata labels, annotations and the selector,
/// plus the pod template for everything but services
fn add_canary_labels_and_annotations(object: &mut ManifestObject, version: VersionLabel) {
    let labels = version.labels();
    update_object_labels(object, &labels, false);
    update_object_annotations(object, &labels, false);
    update_selector_labels(object, &labels, false);
    if *object.kind() != ResourceKind::Service {
        update_spec_labels(object, &labels, false);
    }
}

/// Derive a `-canary`/`-baseline`/`-stable` variant
///
/// # Arguments
/// * `source` - Object the spec is copied from
/// * `base_name` - Name the suffix is appended to
/// * `replicas` - Replica count for replica-bearing kinds; `None` keeps the source's
/// * `version` - Version label and name suffix
pub fn new_canary_object(
    source: &ManifestObject,
    base_name: &str,
    replicas: Option<i32>,
    version: VersionLabel,
) -> ManifestObject {
    let mut object = source.renamed(suffixed_name(base_name, version.suffix()));
    add_canary_labels_and_annotations(&mut object, version);
    if let Some(replicas) = replicas {
        set_replica_count(&mut object, replicas);
    }
    object
}

pub fn new_canary_resource(input: &ManifestObject, replicas: Option<i32>) -> ManifestObject {
    new_canary_object(input, input.name(), replicas, VersionLabel::Canary)
}

/// Baseline derived from the spec currently running as stable
///
/// `base_name` is the input object's name, so a `-stable` source still
/// yields `<name>-baseline`.
pub fn new_baseline_resource(
    stable: &ManifestObject,
    base_name: &str,
    replicas: Option<i32>,
) -> ManifestObject {
    new_canary_object(stable, base_name, replicas, VersionLabel::Baseline)
}

/// `-stable` copy of the input with its full replica count
pub fn stable_resource(input: &ManifestObject) -> ManifestObject {
    let replicas = input
        .kind()
        .has_replicas()
        .then(|| replica_count(input));
    new_canary_object(input, input.name(), replicas, VersionLabel::Stable)
}

/// Delete the `-canary` and `-baseline` variants of every workload
///
/// Services are included for the SMI method. Deletes are best effort.
pub async fn delete_canary_deployment(
    ctx: &Context,
    objects: &[ManifestObject],
    include_services: bool,
) {
    let targets: Vec<ResourceIdentifier> = objects
        .iter()
        .filter(|object| {
            object.kind().is_deployment_entity()
                || (include_services && *object.kind() == ResourceKind::Service)
        })
        .flat_map(|object| {
            [VersionLabel::Canary, VersionLabel::Baseline].map(|version| {
                ResourceIdentifier::new(
                    object.kind().as_str(),
                    suffixed_name(object.name(), version.suffix()),
                )
            })
        })
        .collect();
    debug!(targets = targets.len(), "Deleting canary resources");
    delete_objects(ctx, &targets).await;
}
