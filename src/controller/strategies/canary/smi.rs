//! SMI canary: `-stable`, `-baseline` and `-canary` services weighted by a TrafficSplit

use super::{
    canary_replica_count, new_baseline_resource, new_canary_object, new_canary_resource,
    stable_resource,
};
use crate::controller::rollout::{
    fetch_traffic_split, traffic_split_manifest, CanaryWeights, Context, TrafficSplit, MAX_WEIGHT,
};
use crate::controller::strategies::{apply_objects, fetch_existing, StrategyError};
use crate::manifest::labels::{suffixed_name, VersionLabel, CANARY_SUFFIX, STABLE_SUFFIX};
use crate::manifest::transform::replica_count;
use crate::manifest::{ManifestObject, ResourceKind};
use tracing::{debug, info};

/// Apply SMI canary workloads, then their services and traffic splits
///
/// Objects that are not workloads, the root service included, are applied
/// unchanged next to the workloads.
///
/// # Arguments
/// * `ctx` - Deployment context; `baseline-and-canary-replicas` overrides the computed count
/// * `objects` - Input manifests
/// * `percentage` - Share of traffic for baseline plus canary
/// * `only_stable` - Apply `-stable` workloads at full size instead of canaries (promote)
///
/// # Returns
/// Every object applied
pub async fn deploy_smi_canary(
    ctx: &Context,
    objects: &[ManifestObject],
    percentage: i32,
    only_stable: bool,
) -> Result<Vec<ManifestObject>, StrategyError> {
    let mut deployed = Vec::new();

    for object in objects {
        if !object.kind().is_deployment_entity() {
            deployed.push(object.clone());
            continue;
        }
        if only_stable {
            deployed.push(stable_resource(object));
            continue;
        }

        let replicas = ctx
            .config
            .baseline_and_canary_replicas
            .unwrap_or_else(|| canary_replica_count(replica_count(object), percentage));
        deployed.push(new_canary_resource(object, Some(replicas)));

        let stable_name = suffixed_name(object.name(), STABLE_SUFFIX);
        match fetch_existing(ctx, object.kind(), &stable_name).await? {
            Some(stable) => {
                debug!(resource = %object, replicas, "Stable workload found, adding baseline");
                deployed.push(new_baseline_resource(&stable, object.name(), Some(replicas)));
            }
            None => debug!(resource = %object, "No stable workload, deploying canary only"),
        }
    }

    info!(
        objects = deployed.len(),
        only_stable, "Applying SMI canary objects"
    );
    apply_objects(ctx, &deployed).await?;

    deployed.extend(create_canary_services(ctx, objects, percentage).await?);
    Ok(deployed)
}

/// Apply the canary and baseline variants of every service plus its traffic split
///
/// The first run also creates the `-stable` service and a split sending all
/// traffic to it. Later runs move the split to `percentage`, except while the
/// canary carries the full weight during a promote.
pub async fn create_canary_services(
    ctx: &Context,
    objects: &[ManifestObject],
    percentage: i32,
) -> Result<Vec<ManifestObject>, StrategyError> {
    let mut deployed = Vec::new();

    for service in objects
        .iter()
        .filter(|o| *o.kind() == ResourceKind::Service)
    {
        let name = service.name();
        deployed.push(new_canary_object(service, name, None, VersionLabel::Canary));
        deployed.push(new_canary_object(service, name, None, VersionLabel::Baseline));

        let stable_name = suffixed_name(name, STABLE_SUFFIX);
        if fetch_existing(ctx, &ResourceKind::Service, &stable_name)
            .await?
            .is_none()
        {
            info!(service = %name, "Creating stable service and traffic split");
            deployed.push(new_canary_object(service, name, None, VersionLabel::Stable));
            let split = TrafficSplit::canary(name, CanaryWeights::all_stable())?;
            deployed.push(traffic_split_manifest(ctx, &split).await?);
            continue;
        }

        let canary_service = suffixed_name(name, CANARY_SUFFIX);
        let canary_weight = fetch_traffic_split(ctx, name)
            .await?
            .and_then(|split| split.weight_of(&canary_service));
        if canary_weight == Some(MAX_WEIGHT) {
            debug!(service = %name, "Canary carries all traffic, leaving split unchanged");
            continue;
        }

        let split = TrafficSplit::canary(name, CanaryWeights::from_percentage(percentage))?;
        debug!(service = %name, percentage, "Updating traffic split");
        deployed.push(traffic_split_manifest(ctx, &split).await?);
    }

    apply_objects(ctx, &deployed).await?;
    Ok(deployed)
}

/// Rewrite the traffic split of every service with fixed weights
pub async fn adjust_traffic(
    ctx: &Context,
    objects: &[ManifestObject],
    weights: CanaryWeights,
) -> Result<(), StrategyError> {
    let mut splits = Vec::new();
    for service in objects
        .iter()
        .filter(|o| *o.kind() == ResourceKind::Service)
    {
        let split = TrafficSplit::canary(service.name(), weights)?;
        splits.push(traffic_split_manifest(ctx, &split).await?);
    }

    info!(
        splits = splits.len(),
        stable = weights.stable,
        canary = weights.canary,
        "Adjusting traffic"
    );
    apply_objects(ctx, &splits).await
}

pub async fn redirect_traffic_to_canary(
    ctx: &Context,
    objects: &[ManifestObject],
) -> Result<(), StrategyError> {
    adjust_traffic(ctx, objects, CanaryWeights::all_canary()).await
}

pub async fn redirect_traffic_to_stable(
    ctx: &Context,
    objects: &[ManifestObject],
) -> Result<(), StrategyError> {
    adjust_traffic(ctx, objects, CanaryWeights::all_stable()).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::controller::rollout::{DeployConfig, TrafficSplitError};
    use crate::kubectl::fake::FakeKubectl;
    use crate::manifest::ManifestStore;
    use serde_json::{json, Value};

    fn deployment(name: &str, replicas: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name },
            "spec": {
                "replicas": replicas,
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "metadata": { "labels": { "app": "web" } },
                    "spec": { "containers": [{ "name": "app", "image": "app:v2" }] }
                }
            }
        })
    }

    fn service(name: &str) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name },
            "spec": { "selector": { "app": "web" }, "ports": [{ "port": 80 }] }
        })
    }

    fn inputs() -> Vec<ManifestObject> {
        vec![
            ManifestObject::from_value(deployment("web", 10)).unwrap(),
            ManifestObject::from_value(service("web")).unwrap(),
        ]
    }

    fn weights(mock: &FakeKubectl) -> (Value, Value, Value) {
        let split = mock.object("trafficsplit", "web-trafficsplit").unwrap();
        let backends = &split["spec"]["backends"];
        (
            backends[0]["weight"].clone(),
            backends[1]["weight"].clone(),
            backends[2]["weight"].clone(),
        )
    }

    #[tokio::test]
    async fn test_first_deploy_creates_stable_service_and_split() {
        let mock = Context::new_mock(DeployConfig::default());

        deploy_smi_canary(&mock.ctx, &inputs(), 20, false)
            .await
            .unwrap();

        assert!(mock.kubectl.exists("deployment", "web-canary"));
        assert!(!mock.kubectl.exists("deployment", "web-baseline"));
        assert_eq!(
            mock.kubectl.names("service"),
            vec!["web", "web-baseline", "web-canary", "web-stable"]
        );
        let stable = mock.kubectl.object("service", "web-stable").unwrap();
        assert_eq!(stable["spec"]["selector"]["workflow/version"], "stable");
        assert_eq!(weights(&mock.kubectl), (json!(1000), json!(0), json!(0)));

        let split = mock.kubectl.object("trafficsplit", "web-trafficsplit").unwrap();
        assert_eq!(split["apiVersion"], "split.smi-spec.io/v1alpha3");
        assert_eq!(split["spec"]["service"], "web");
    }

    #[tokio::test]
    async fn test_second_deploy_weights_split_and_adds_baseline() {
        let config = DeployConfig {
            baseline_and_canary_replicas: Some(2),
            ..DeployConfig::default()
        };
        let mock = Context::new_mock(config);
        mock.kubectl.insert(deployment("web-stable", 10));
        mock.kubectl.insert(service("web-stable"));

        deploy_smi_canary(&mock.ctx, &inputs(), 20, false)
            .await
            .unwrap();

        assert_eq!(weights(&mock.kubectl), (json!(800), json!(100), json!(100)));
        let canary = mock.kubectl.object("deployment", "web-canary").unwrap();
        let baseline = mock.kubectl.object("deployment", "web-baseline").unwrap();
        assert_eq!(canary["spec"]["replicas"], 2);
        assert_eq!(baseline["spec"]["replicas"], 2);
    }

    #[tokio::test]
    async fn test_split_left_alone_while_canary_has_all_traffic() {
        let mock = Context::new_mock(DeployConfig::default());
        mock.kubectl.insert(service("web-stable"));
        redirect_traffic_to_canary(&mock.ctx, &inputs()).await.unwrap();

        let deployed = deploy_smi_canary(&mock.ctx, &inputs(), 20, true)
            .await
            .unwrap();

        assert_eq!(weights(&mock.kubectl), (json!(0), json!(0), json!(1000)));
        let stable = mock.kubectl.object("deployment", "web-stable").unwrap();
        assert_eq!(stable["spec"]["replicas"], 10);
        assert!(deployed.iter().all(|o| o.kind_name() != "TrafficSplit"));
    }

    #[tokio::test]
    async fn test_redirect_to_stable() {
        let mock = Context::new_mock(DeployConfig::default());

        redirect_traffic_to_stable(&mock.ctx, &inputs()).await.unwrap();

        assert_eq!(weights(&mock.kubectl), (json!(1000), json!(0), json!(0)));
        assert_eq!(mock.kubectl.calls_to("apply"), vec!["apply trafficsplit/web-trafficsplit"]);
    }

    #[tokio::test]
    async fn test_pinned_api_version_skips_discovery() {
        let kubectl = std::sync::Arc::new(FakeKubectl::with_api_versions(&["apps/v1", "v1"]));
        let mock = Context::new_mock(DeployConfig::default());
        let ctx = Context::new(
            kubectl.clone(),
            ManifestStore::new(mock.temp_dir.path().join("pinned")).unwrap(),
            mock.clock.clone(),
            DeployConfig::default(),
        )
        .with_traffic_split_api_version("split.smi-spec.io/v1alpha2");

        redirect_traffic_to_stable(&ctx, &inputs()).await.unwrap();

        let split = kubectl.object("trafficsplit", "web-trafficsplit").unwrap();
        assert_eq!(split["apiVersion"], "split.smi-spec.io/v1alpha2");
        assert!(kubectl.calls_to("api-versions").is_empty());
    }

    #[tokio::test]
    async fn test_missing_split_api_is_fatal() {
        let mock = Context::new_mock(DeployConfig::default());
        let ctx = Context::new(
            std::sync::Arc::new(FakeKubectl::with_api_versions(&["apps/v1", "v1"])),
            ManifestStore::new(mock.temp_dir.path().join("other")).unwrap(),
            mock.clock.clone(),
            DeployConfig::default(),
        );

        let err = redirect_traffic_to_stable(&ctx, &inputs()).await.unwrap_err();

        assert!(matches!(
            err,
            StrategyError::TrafficSplit(TrafficSplitError::ApiVersionNotFound)
        ));
    }
}
