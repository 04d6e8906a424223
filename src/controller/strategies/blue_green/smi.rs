//! SMI routing: a TrafficSplit weights `-stable` against `-green` per service

use tracing::info;

use super::new_blue_green_object;
use crate::controller::rollout::{
    traffic_split_manifest, traffic_split_name, Context, TrafficSplit, TRAFFIC_SPLIT_KIND,
};
use crate::controller::strategies::{apply_objects, delete_objects, StrategyError};
use crate::manifest::labels::{suffixed_name, ColorLabel, GREEN_SUFFIX, STABLE_SUFFIX};
use crate::manifest::{ManifestObject, ResourceIdentifier};

/// `-stable` service shim selecting the stable color
pub fn stable_service(service: &ManifestObject) -> ManifestObject {
    let renamed = service.renamed(suffixed_name(service.name(), STABLE_SUFFIX));
    new_blue_green_object(&renamed, ColorLabel::None)
}

/// `-green` service shim selecting the green color
pub fn green_service(service: &ManifestObject) -> ManifestObject {
    new_blue_green_object(service, ColorLabel::Green)
}

/// Create the service shims, then a split per service routed to stable
///
/// # Returns
/// Shims and splits, in apply order
pub async fn setup_smi(
    ctx: &Context,
    services: &[ManifestObject],
) -> Result<Vec<ManifestObject>, StrategyError> {
    let mut shims = Vec::with_capacity(services.len() * 2);
    for service in services {
        shims.push(stable_service(service));
        shims.push(green_service(service));
    }
    info!(services = services.len(), "Creating SMI service shims");
    apply_objects(ctx, &shims).await?;

    let splits = split_manifests(ctx, services, ColorLabel::None).await?;
    apply_objects(ctx, &splits).await?;

    shims.extend(splits);
    Ok(shims)
}

async fn split_manifests(
    ctx: &Context,
    services: &[ManifestObject],
    color: ColorLabel,
) -> Result<Vec<ManifestObject>, StrategyError> {
    let mut splits = Vec::with_capacity(services.len());
    for service in services {
        let split = TrafficSplit::blue_green(service.name(), color);
        splits.push(traffic_split_manifest(ctx, &split).await?);
    }
    Ok(splits)
}

/// Send all traffic of every routed service to `color`
pub async fn route_smi(
    ctx: &Context,
    services: &[ManifestObject],
    color: ColorLabel,
) -> Result<(), StrategyError> {
    let splits = split_manifests(ctx, services, color).await?;
    info!(splits = splits.len(), %color, "Routing traffic splits");
    apply_objects(ctx, &splits).await
}

/// Best-effort delete of each service's split and both shims
pub async fn cleanup_smi(ctx: &Context, services: &[ManifestObject]) {
    let targets: Vec<ResourceIdentifier> = services
        .iter()
        .flat_map(|service| {
            let kind = service.kind().as_str();
            [
                ResourceIdentifier::new(TRAFFIC_SPLIT_KIND, traffic_split_name(service.name())),
                ResourceIdentifier::new(kind, suffixed_name(service.name(), GREEN_SUFFIX)),
                ResourceIdentifier::new(kind, suffixed_name(service.name(), STABLE_SUFFIX)),
            ]
        })
        .collect();
    delete_objects(ctx, &targets).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::controller::rollout::{validate_traffic_split_state, DeployConfig};
    use serde_json::json;

    fn service(name: &str) -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name },
            "spec": { "selector": { "app": name }, "ports": [{ "port": 80 }] }
        }))
        .unwrap()
    }

    #[test]
    fn test_shims_select_their_color() {
        let stable = stable_service(&service("web"));
        let green = green_service(&service("web"));

        assert_eq!(stable.name(), "web-stable");
        assert_eq!(
            stable.pointer("/spec/selector/k8s.deploy.color"),
            Some(&json!("None"))
        );
        assert_eq!(green.name(), "web-green");
        assert_eq!(
            green.pointer("/spec/selector/k8s.deploy.color"),
            Some(&json!("green"))
        );
    }

    #[tokio::test]
    async fn test_setup_then_route_to_green_is_promotable() {
        let mock = Context::new_mock(DeployConfig::default());
        let services = vec![service("web")];

        let created = setup_smi(&mock.ctx, &services).await.unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(
            validate_traffic_split_state(&mock.ctx, &services).await.unwrap(),
            vec!["web-trafficsplit"]
        );

        route_smi(&mock.ctx, &services, ColorLabel::Green).await.unwrap();

        let split = mock.kubectl.object("trafficsplit", "web-trafficsplit").unwrap();
        assert_eq!(
            split["spec"]["backends"],
            json!([
                { "service": "web-stable", "weight": 0 },
                { "service": "web-green", "weight": 1000 }
            ])
        );
        assert!(validate_traffic_split_state(&mock.ctx, &services)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_split_and_shims() {
        let mock = Context::new_mock(DeployConfig::default());
        let services = vec![service("web")];
        setup_smi(&mock.ctx, &services).await.unwrap();

        cleanup_smi(&mock.ctx, &services).await;

        assert!(mock.kubectl.names("trafficsplit").is_empty());
        assert!(mock.kubectl.names("service").is_empty());
        assert_eq!(
            mock.kubectl.calls_to("delete"),
            vec![
                "delete trafficsplit/web-trafficsplit",
                "delete service/web-green",
                "delete service/web-stable"
            ]
        );
    }
}
