//! Blue-Green deployment strategy
//!
//! Runs a full `-green` copy of the workloads next to the stable ones.
//! Traffic is switched all at once by rewriting ingress backends, flipping
//! service selectors, or weighting an SMI TrafficSplit.

pub mod ingress;
pub mod service;
pub mod smi;

use std::collections::BTreeMap;

use super::{apply_objects, delete_objects, DeploymentStrategyHandler, StrategyError};
use crate::controller::rollout::{
    check_manifest_stability, validate_traffic_split_state, Context, RouteStrategy,
    STABILITY_KINDS,
};
use crate::manifest::labels::{suffixed_name, ColorLabel, GREEN_SUFFIX};
use crate::manifest::transform::{
    get_resources, is_service_routed, update_object_labels, update_selector_labels,
    update_spec_labels,
};
use crate::manifest::{ManifestObject, ResourceIdentifier, ResourceKind};
use async_trait::async_trait;
use tracing::{debug, info};

/// Input manifests sorted by the part they play in blue-green routing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlueGreenManifests {
    /// Services selecting a workload from the same manifests
    pub services: Vec<ManifestObject>,
    /// Routed service name → green service name
    pub service_name_map: BTreeMap<String, String>,
    pub unrouted_services: Vec<ManifestObject>,
    pub deployments: Vec<ManifestObject>,
    pub ingresses: Vec<ManifestObject>,
    pub others: Vec<ManifestObject>,
}

/// Classify objects for blue-green routing
///
/// Workloads are collected first, so a service counts as routed whatever
/// its position relative to the workload it selects.
pub fn get_manifest_objects(objects: &[ManifestObject]) -> BlueGreenManifests {
    let mut manifests = BlueGreenManifests::default();

    for object in objects {
        match object.kind() {
            kind if kind.is_deployment_entity() => manifests.deployments.push(object.clone()),
            ResourceKind::Service => {}
            ResourceKind::Ingress => manifests.ingresses.push(object.clone()),
            _ => manifests.others.push(object.clone()),
        }
    }

    for service in objects
        .iter()
        .filter(|o| *o.kind() == ResourceKind::Service)
    {
        if is_service_routed(service, &manifests.deployments) {
            manifests.service_name_map.insert(
                service.name().to_string(),
                suffixed_name(service.name(), GREEN_SUFFIX),
            );
            manifests.services.push(service.clone());
        } else {
            manifests.unrouted_services.push(service.clone());
        }
    }

    debug!(
        deployments = manifests.deployments.len(),
        routed_services = manifests.services.len(),
        unrouted_services = manifests.unrouted_services.len(),
        ingresses = manifests.ingresses.len(),
        others = manifests.others.len(),
        "Classified blue-green manifests"
    );
    manifests
}

/// Put the color label on metadata labels and the selector, plus the pod
/// template for everything but services
pub fn add_blue_green_labels(object: &mut ManifestObject, color: ColorLabel) {
    let labels = color.labels();
    update_object_labels(object, &labels, false);
    update_selector_labels(object, &labels, false);
    if *object.kind() != ResourceKind::Service {
        update_spec_labels(object, &labels, false);
    }
}

/// Colored copy of an object; only green copies are renamed to `-green`
pub fn new_blue_green_object(input: &ManifestObject, color: ColorLabel) -> ManifestObject {
    let mut object = match color {
        ColorLabel::Green => input.renamed(suffixed_name(input.name(), GREEN_SUFFIX)),
        ColorLabel::None => input.clone(),
    };
    add_blue_green_labels(&mut object, color);
    object
}

/// Apply colored copies of the objects
///
/// # Returns
/// The copies applied
pub async fn deploy_with_label(
    ctx: &Context,
    objects: &[ManifestObject],
    color: ColorLabel,
) -> Result<Vec<ManifestObject>, StrategyError> {
    let colored: Vec<ManifestObject> = objects
        .iter()
        .map(|object| new_blue_green_object(object, color))
        .collect();
    debug!(objects = colored.len(), %color, "Deploying with color label");
    apply_objects(ctx, &colored).await?;
    Ok(colored)
}

/// Best-effort delete of the `-green` copies of the objects
pub async fn delete_green_objects(ctx: &Context, objects: &[ManifestObject]) {
    let targets: Vec<ResourceIdentifier> = objects
        .iter()
        .map(|object| {
            ResourceIdentifier::new(
                object.kind().as_str(),
                suffixed_name(object.name(), GREEN_SUFFIX),
            )
        })
        .collect();
    delete_objects(ctx, &targets).await;
}

/// Blue-green strategy handler
///
/// - Deploy: green workloads next to stable, then a fixed buffer, then routing
/// - Promote: only from the fully green-routed state; green content becomes stable
/// - Reject: routing back to stable and green objects removed
pub struct BlueGreenStrategyHandler {
    pub route_method: RouteStrategy,
}

#[async_trait]
impl DeploymentStrategyHandler for BlueGreenStrategyHandler {
    fn name(&self) -> &'static str {
        "blue-green"
    }

    async fn deploy(
        &self,
        objects: &[ManifestObject],
        ctx: &Context,
    ) -> Result<Vec<ManifestObject>, StrategyError> {
        let manifests = get_manifest_objects(objects);
        info!(route_method = %self.route_method, "Deploying green workloads");

        let deployed = match self.route_method {
            RouteStrategy::Ingress => {
                let workloads = [manifests.deployments.clone(), manifests.services.clone()].concat();
                let mut deployed = deploy_with_label(ctx, &workloads, ColorLabel::Green).await?;

                let plain = [manifests.others, manifests.unrouted_services].concat();
                apply_objects(ctx, &plain).await?;
                deployed.extend(plain);
                deployed
            }
            RouteStrategy::Service => {
                let mut deployed =
                    deploy_with_label(ctx, &manifests.deployments, ColorLabel::Green).await?;

                let plain = [
                    manifests.others,
                    manifests.ingresses,
                    manifests.unrouted_services,
                ]
                .concat();
                apply_objects(ctx, &plain).await?;
                deployed.extend(plain);
                deployed
            }
            RouteStrategy::Smi => {
                let plain = [
                    manifests.others,
                    manifests.services.clone(),
                    manifests.ingresses,
                    manifests.unrouted_services,
                ]
                .concat();
                apply_objects(ctx, &plain).await?;

                smi::setup_smi(ctx, &manifests.services).await?;

                let mut deployed =
                    deploy_with_label(ctx, &manifests.deployments, ColorLabel::Green).await?;
                deployed.extend(plain);
                deployed
            }
        };
        Ok(deployed)
    }

    async fn route(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError> {
        let buffer = ctx.config.version_switch_buffer;
        info!(
            seconds = buffer.as_secs(),
            at = %ctx.clock.now().to_rfc3339(),
            "Starting version switch buffer"
        );
        ctx.clock.sleep(buffer).await;
        info!(
            seconds = buffer.as_secs(),
            at = %ctx.clock.now().to_rfc3339(),
            "Stopping version switch buffer"
        );

        let manifests = get_manifest_objects(objects);
        match self.route_method {
            RouteStrategy::Ingress => {
                ingress::route_ingresses(
                    ctx,
                    &manifests.ingresses,
                    &manifests.service_name_map,
                    ColorLabel::Green,
                )
                .await
            }
            RouteStrategy::Service => {
                service::route_services(ctx, &manifests.services, ColorLabel::Green).await
            }
            RouteStrategy::Smi => smi::route_smi(ctx, &manifests.services, ColorLabel::Green).await,
        }
    }

    async fn promote(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError> {
        let manifests = get_manifest_objects(objects);

        let (offending, message) = match self.route_method {
            RouteStrategy::Ingress => (
                ingress::validate_ingresses(ctx, &manifests.ingresses, &manifests.service_name_map)
                    .await?,
                "Ingresses are not in promote state",
            ),
            RouteStrategy::Service => (
                service::validate_services(ctx, &manifests.services).await?,
                "Found services not in promote state",
            ),
            RouteStrategy::Smi => (
                validate_traffic_split_state(ctx, &manifests.services).await?,
                "Traffic splits are not in promote state",
            ),
        };
        if !offending.is_empty() {
            return Err(StrategyError::State {
                message: message.to_string(),
                resources: offending,
            });
        }

        let promoted = match self.route_method {
            RouteStrategy::Ingress => {
                [manifests.deployments.clone(), manifests.services.clone()].concat()
            }
            RouteStrategy::Service | RouteStrategy::Smi => manifests.deployments.clone(),
        };
        info!(objects = promoted.len(), "Promoting green workloads to stable");
        let deployed = deploy_with_label(ctx, &promoted, ColorLabel::None).await?;

        let resources = get_resources(&deployed, STABILITY_KINDS, &ctx.config.namespace);
        check_manifest_stability(ctx, &resources).await?;

        info!("Routing traffic back to stable");
        match self.route_method {
            RouteStrategy::Ingress => {
                ingress::route_ingresses(
                    ctx,
                    &manifests.ingresses,
                    &manifests.service_name_map,
                    ColorLabel::None,
                )
                .await?;
            }
            RouteStrategy::Service => {
                service::route_services(ctx, &manifests.services, ColorLabel::None).await?;
            }
            RouteStrategy::Smi => {
                smi::route_smi(ctx, &manifests.services, ColorLabel::None).await?;
            }
        }

        info!("Deleting green objects");
        delete_green_objects(ctx, &promoted).await;
        if self.route_method == RouteStrategy::Smi {
            smi::cleanup_smi(ctx, &manifests.services).await;
        }
        Ok(())
    }

    async fn reject(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError> {
        let manifests = get_manifest_objects(objects);
        info!(route_method = %self.route_method, "Rejecting green workloads");

        match self.route_method {
            RouteStrategy::Ingress => {
                ingress::route_ingresses(
                    ctx,
                    &manifests.ingresses,
                    &manifests.service_name_map,
                    ColorLabel::None,
                )
                .await?;
                let green = [manifests.deployments, manifests.services].concat();
                delete_green_objects(ctx, &green).await;
            }
            RouteStrategy::Service => {
                service::route_services(ctx, &manifests.services, ColorLabel::None).await?;
                delete_green_objects(ctx, &manifests.deployments).await;
            }
            RouteStrategy::Smi => {
                smi::route_smi(ctx, &manifests.services, ColorLabel::None).await?;
                delete_green_objects(ctx, &manifests.deployments).await;
                smi::cleanup_smi(ctx, &manifests.services).await;
            }
        }
        Ok(())
    }

    fn supports_promotion(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::controller::rollout::DeployConfig;
    use serde_json::json;

    fn deployment(name: &str, app: &str) -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": app } },
                "template": {
                    "metadata": { "labels": { "app": app } },
                    "spec": { "containers": [{ "name": "app", "image": "app:v2" }] }
                }
            }
        }))
        .unwrap()
    }

    fn service(name: &str, app: &str) -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name },
            "spec": { "selector": { "app": app }, "ports": [{ "port": 80 }] }
        }))
        .unwrap()
    }

    fn config_map() -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings" }
        }))
        .unwrap()
    }

    #[test]
    fn test_services_before_their_workload_are_routed() {
        let objects = vec![
            service("web", "web"),
            service("db", "postgres"),
            deployment("web", "web"),
            config_map(),
        ];

        let manifests = get_manifest_objects(&objects);

        assert_eq!(manifests.services, vec![service("web", "web")]);
        assert_eq!(manifests.unrouted_services, vec![service("db", "postgres")]);
        assert_eq!(manifests.deployments.len(), 1);
        assert_eq!(manifests.others, vec![config_map()]);
        assert_eq!(
            manifests.service_name_map,
            BTreeMap::from([("web".to_string(), "web-green".to_string())])
        );
    }

    #[test]
    fn test_green_object_is_renamed_and_labelled() {
        let green = new_blue_green_object(&deployment("web", "web"), ColorLabel::Green);

        assert_eq!(green.name(), "web-green");
        assert_eq!(green.labels()["k8s.deploy.color"], "green");
        assert_eq!(
            green.pointer("/spec/selector/matchLabels/k8s.deploy.color"),
            Some(&json!("green"))
        );
        assert_eq!(
            green.pointer("/spec/template/metadata/labels/k8s.deploy.color"),
            Some(&json!("green"))
        );
    }

    #[test]
    fn test_stable_object_keeps_its_name() {
        let stable = new_blue_green_object(&service("web", "web"), ColorLabel::None);

        assert_eq!(stable.name(), "web");
        assert_eq!(
            stable.pointer("/spec/selector"),
            Some(&json!({ "app": "web", "k8s.deploy.color": "None" }))
        );
    }

    #[tokio::test]
    async fn test_service_deploy_leaves_routed_service_alone() {
        let mock = Context::new_mock(DeployConfig::default());
        let handler = BlueGreenStrategyHandler {
            route_method: RouteStrategy::Service,
        };
        let objects = vec![deployment("web", "web"), service("web", "web"), config_map()];

        let deployed = handler.deploy(&objects, &mock.ctx).await.unwrap();

        let names: Vec<String> = deployed.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["Deployment/web-green", "ConfigMap/settings"]);
        assert!(!mock.kubectl.exists("service", "web"));
    }

    #[tokio::test]
    async fn test_route_sleeps_for_buffer() {
        let config = DeployConfig {
            version_switch_buffer: std::time::Duration::from_secs(120),
            ..DeployConfig::default()
        };
        let mock = Context::new_mock(config);
        let handler = BlueGreenStrategyHandler {
            route_method: RouteStrategy::Service,
        };

        handler
            .route(&[deployment("web", "web"), service("web", "web")], &mock.ctx)
            .await
            .unwrap();

        assert_eq!(
            mock.clock.sleeps(),
            vec![std::time::Duration::from_secs(120)]
        );
        let routed = mock.kubectl.object("service", "web").unwrap();
        assert_eq!(routed["spec"]["selector"]["k8s.deploy.color"], "green");
    }

    #[tokio::test]
    async fn test_delete_green_objects_targets_green_names() {
        let mock = Context::new_mock(DeployConfig::default());

        delete_green_objects(&mock.ctx, &[deployment("web", "web"), service("web", "web")]).await;

        assert_eq!(
            mock.kubectl.calls_to("delete"),
            vec!["delete deployment/web-green", "delete service/web-green"]
        );
    }
}
