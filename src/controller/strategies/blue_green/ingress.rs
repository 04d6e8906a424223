//! Ingress routing: backends point at `-green` services while green is live

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use super::add_blue_green_labels;
use crate::controller::rollout::Context;
use crate::controller::strategies::{apply_objects, fetch_existing, StrategyError};
use crate::manifest::labels::{ColorLabel, BLUE_GREEN_VERSION_LABEL};
use crate::manifest::ManifestObject;

/// Whether any backend of the ingress names a routed service
///
/// Both backend shapes count: `service: { name }` and `serviceName`.
pub fn is_ingress_routed(ingress: &ManifestObject, service_name_map: &BTreeMap<String, String>) -> bool {
    references_routed_service(ingress.data(), service_name_map)
}

fn references_routed_service(value: &Value, service_name_map: &BTreeMap<String, String>) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, child)| {
            let named = match key.as_str() {
                "service" => child
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| service_name_map.contains_key(name)),
                "serviceName" => child
                    .as_str()
                    .is_some_and(|name| service_name_map.contains_key(name)),
                _ => false,
            };
            named || references_routed_service(child, service_name_map)
        }),
        Value::Array(items) => items
            .iter()
            .any(|item| references_routed_service(item, service_name_map)),
        _ => false,
    }
}

/// Point every backend at its mapped service name
///
/// Rewrites objects under any `backend` (case-insensitive) or
/// `defaultBackend` key, in either shape. Names missing from the map are
/// left as they are.
pub fn rewrite_backends(value: &mut Value, service_name_map: &BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let key = key.to_ascii_lowercase();
                if key == "backend" || key == "defaultbackend" {
                    rewrite_backend(child, service_name_map);
                }
                rewrite_backends(child, service_name_map);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_backends(item, service_name_map);
            }
        }
        _ => {}
    }
}

fn rewrite_backend(backend: &mut Value, service_name_map: &BTreeMap<String, String>) {
    if let Some(name) = backend.pointer_mut("/service/name") {
        if let Some(mapped) = name.as_str().and_then(|n| service_name_map.get(n)) {
            *name = Value::String(mapped.clone());
        }
    }
    if let Some(name) = backend.get_mut("serviceName") {
        if let Some(mapped) = name.as_str().and_then(|n| service_name_map.get(n)) {
            *name = Value::String(mapped.clone());
        }
    }
}

/// Colored copy of an ingress with its backends rewritten
pub fn updated_ingress(
    ingress: &ManifestObject,
    service_name_map: &BTreeMap<String, String>,
    color: ColorLabel,
) -> ManifestObject {
    let mut updated = ingress.clone();
    add_blue_green_labels(&mut updated, color);
    rewrite_backends(updated.data_mut(), service_name_map);
    updated
}

/// Route ingresses to green, or restore them as written
///
/// - `Green`: routed ingresses are rewritten to the green services; the rest
///   are applied as written
/// - `None`: routed ingresses are applied as written, pointing back at the
///   stable services
pub async fn route_ingresses(
    ctx: &Context,
    ingresses: &[ManifestObject],
    service_name_map: &BTreeMap<String, String>,
    color: ColorLabel,
) -> Result<(), StrategyError> {
    let routed: Vec<ManifestObject> = match color {
        ColorLabel::Green => ingresses
            .iter()
            .map(|ingress| {
                if is_ingress_routed(ingress, service_name_map) {
                    updated_ingress(ingress, service_name_map, color)
                } else {
                    ingress.clone()
                }
            })
            .collect(),
        ColorLabel::None => ingresses
            .iter()
            .filter(|ingress| is_ingress_routed(ingress, service_name_map))
            .cloned()
            .collect(),
    };

    info!(ingresses = routed.len(), %color, "Routing ingresses");
    apply_objects(ctx, &routed).await
}

/// Names of routed ingresses that are missing or not labelled green
pub async fn validate_ingresses(
    ctx: &Context,
    ingresses: &[ManifestObject],
    service_name_map: &BTreeMap<String, String>,
) -> Result<Vec<String>, StrategyError> {
    let mut offending = Vec::new();
    for ingress in ingresses
        .iter()
        .filter(|ingress| is_ingress_routed(ingress, service_name_map))
    {
        let existing = fetch_existing(ctx, ingress.kind(), ingress.name()).await?;
        let green = existing.is_some_and(|existing| {
            existing
                .labels()
                .get(BLUE_GREEN_VERSION_LABEL)
                .is_some_and(|color| color == ColorLabel::Green.as_str())
        });
        if !green {
            debug!(ingress = %ingress, "Ingress is not routed to green");
            offending.push(ingress.name().to_string());
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

    fn name_map() -> BTreeMap<String, String> {
        BTreeMap::from([("web".to_string(), "web-green".to_string())])
    }

    fn ingress_v1(service: &str) -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "networking.k8s.io/v1",
            "kind": "Ingress",
            "metadata": { "name": "edge" },
            "spec": {
                "defaultBackend": { "service": { "name": service, "port": { "number": 80 } } },
                "rules": [{
                    "http": {
                        "paths": [
                            {
                                "path": "/",
                                "pathType": "Prefix",
                                "backend": { "service": { "name": service, "port": { "number": 80 } } }
                            },
                            {
                                "path": "/docs",
                                "pathType": "Prefix",
                                "backend": { "service": { "name": "docs", "port": { "number": 80 } } }
                            }
                        ]
                    }
                }]
            }
        }))
        .unwrap()
    }

    fn ingress_v1beta1(service: &str) -> ManifestObject {
        ManifestObject::from_value(json!({
            "apiVersion": "networking.k8s.io/v1beta1",
            "kind": "Ingress",
            "metadata": { "name": "legacy" },
            "spec": {
                "backend": { "serviceName": service, "servicePort": 80 },
                "rules": [{
                    "http": { "paths": [{ "backend": { "serviceName": service, "servicePort": 80 } }] }
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_is_ingress_routed_both_shapes() {
        assert!(is_ingress_routed(&ingress_v1("web"), &name_map()));
        assert!(is_ingress_routed(&ingress_v1beta1("web"), &name_map()));
        assert!(!is_ingress_routed(&ingress_v1("api"), &name_map()));
        assert!(!is_ingress_routed(&ingress_v1beta1("api"), &name_map()));
    }

    #[test]
    fn test_updated_ingress_v1_rewrites_mapped_backends_only() {
        let updated = updated_ingress(&ingress_v1("web"), &name_map(), ColorLabel::Green);

        assert_eq!(updated.labels()["k8s.deploy.color"], "green");
        assert_eq!(
            updated.pointer("/spec/defaultBackend/service/name"),
            Some(&json!("web-green"))
        );
        assert_eq!(
            updated.pointer("/spec/rules/0/http/paths/0/backend/service/name"),
            Some(&json!("web-green"))
        );
        assert_eq!(
            updated.pointer("/spec/rules/0/http/paths/1/backend/service/name"),
            Some(&json!("docs"))
        );
    }

    #[test]
    fn test_updated_ingress_v1beta1_rewrites_service_name() {
        let updated = updated_ingress(&ingress_v1beta1("web"), &name_map(), ColorLabel::Green);

        assert_eq!(
            updated.pointer("/spec/backend/serviceName"),
            Some(&json!("web-green"))
        );
        assert_eq!(
            updated.pointer("/spec/rules/0/http/paths/0/backend/serviceName"),
            Some(&json!("web-green"))
        );
        assert_eq!(updated.pointer("/spec/backend/servicePort"), Some(&json!(80)));
    }

    #[tokio::test]
    async fn test_route_to_green_keeps_unrouted_ingress() {
        let mock = Context::new_mock(DeployConfig::default());
        let other = ingress_v1("api").renamed("api");

        route_ingresses(
            &mock.ctx,
            &[ingress_v1("web"), other],
            &name_map(),
            ColorLabel::Green,
        )
        .await
        .unwrap();

        let edge = mock.kubectl.object("ingress", "edge").unwrap();
        assert_eq!(edge["spec"]["defaultBackend"]["service"]["name"], "web-green");
        let api = mock.kubectl.object("ingress", "api").unwrap();
        assert_eq!(api["spec"]["defaultBackend"]["service"]["name"], "api");
        assert!(api["metadata"].get("labels").is_none());
    }

    #[tokio::test]
    async fn test_route_to_stable_reapplies_routed_ingresses_unchanged() {
        let mock = Context::new_mock(DeployConfig::default());
        let other = ingress_v1("api").renamed("api");

        route_ingresses(
            &mock.ctx,
            &[ingress_v1("web"), other],
            &name_map(),
            ColorLabel::None,
        )
        .await
        .unwrap();

        assert_eq!(mock.kubectl.calls_to("apply"), vec!["apply ingress/edge"]);
        let edge = mock.kubectl.object("ingress", "edge").unwrap();
        assert_eq!(edge["spec"]["defaultBackend"]["service"]["name"], "web");
    }

    #[tokio::test]
    async fn test_validate_ingresses_requires_green_label() {
        let mock = Context::new_mock(DeployConfig::default());
        let green = updated_ingress(&ingress_v1("web"), &name_map(), ColorLabel::Green);
        mock.kubectl.insert(green.to_value().unwrap());
        let legacy = ingress_v1beta1("web");

        let offending = validate_ingresses(&mock.ctx, &[ingress_v1("web"), legacy], &name_map())
            .await
            .unwrap();

        assert_eq!(offending, vec!["legacy"]);
    }
}
