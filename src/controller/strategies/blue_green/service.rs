//! Service routing: the stable service's selector picks the live color

use tracing::{debug, info};

use super::add_blue_green_labels;
use crate::controller::rollout::Context;
use crate::controller::strategies::{apply_objects, fetch_existing, StrategyError};
use crate::manifest::labels::{ColorLabel, BLUE_GREEN_VERSION_LABEL};
use crate::manifest::transform::service_selector;
use crate::manifest::ManifestObject;

/// Re-apply routed services, under their own names, selecting `color`
pub async fn route_services(
    ctx: &Context,
    services: &[ManifestObject],
    color: ColorLabel,
) -> Result<(), StrategyError> {
    let routed: Vec<ManifestObject> = services
        .iter()
        .map(|service| {
            let mut updated = service.clone();
            add_blue_green_labels(&mut updated, color);
            updated
        })
        .collect();

    info!(services = routed.len(), %color, "Routing services");
    apply_objects(ctx, &routed).await
}

/// Names of routed services that are missing or not selecting green
pub async fn validate_services(
    ctx: &Context,
    services: &[ManifestObject],
) -> Result<Vec<String>, StrategyError> {
    let mut offending = Vec::new();
    for service in services {
        let existing = fetch_existing(ctx, service.kind(), service.name()).await?;
        let green = existing
            .as_ref()
            .and_then(service_selector)
            .is_some_and(|selector| {
                selector
                    .get(BLUE_GREEN_VERSION_LABEL)
                    .is_some_and(|color| color == ColorLabel::Green.as_str())
            });
        if !green {
            debug!(service = %service, "Service is not routed to green");
            offending.push(service.name().to_string());
        }
    }
    Ok(offending)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::controller::rollout::DeployConfig;
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

    #[tokio::test]
    async fn test_route_services_flips_selector_in_place() {
        let mock = Context::new_mock(DeployConfig::default());

        route_services(&mock.ctx, &[service("web")], ColorLabel::Green)
            .await
            .unwrap();
        let routed = mock.kubectl.object("service", "web").unwrap();
        assert_eq!(
            routed["spec"]["selector"],
            json!({ "app": "web", "k8s.deploy.color": "green" })
        );
        assert_eq!(routed["metadata"]["labels"]["k8s.deploy.color"], "green");

        route_services(&mock.ctx, &[service("web")], ColorLabel::None)
            .await
            .unwrap();
        let restored = mock.kubectl.object("service", "web").unwrap();
        assert_eq!(restored["spec"]["selector"]["k8s.deploy.color"], "None");
        assert!(!mock.kubectl.exists("service", "web-green"));
    }

    #[tokio::test]
    async fn test_validate_services_lists_missing_and_stable() {
        let mock = Context::new_mock(DeployConfig::default());
        route_services(&mock.ctx, &[service("web")], ColorLabel::Green)
            .await
            .unwrap();
        route_services(&mock.ctx, &[service("api")], ColorLabel::None)
            .await
            .unwrap();

        let offending = validate_services(
            &mock.ctx,
            &[service("web"), service("api"), service("ghost")],
        )
        .await
        .unwrap();

        assert_eq!(offending, vec!["api", "ghost"]);
    }
}
