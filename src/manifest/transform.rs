//! Label, selector, image and pull-secret surgery on manifest objects
//!
//! All functions edit the object they are handed. Callers that derive a new
//! variant clone first, so inputs read from disk are never touched.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::object::{ManifestObject, RawManifest, ResourceKind, RolloutResource};

/// Merge (or replace) the object's metadata labels
///
/// # Arguments
/// * `object` - Object to edit
/// * `new_labels` - Labels to write
/// * `override_existing` - Replace the whole map instead of merging into it
pub fn update_object_labels(
    object: &mut ManifestObject,
    new_labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let labels = &mut object.metadata_mut().labels;
    merge_map(labels, new_labels, override_existing);
}

/// Merge (or replace) the object's metadata annotations
pub fn update_object_annotations(
    object: &mut ManifestObject,
    new_annotations: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let annotations = &mut object.metadata_mut().annotations;
    merge_map(annotations, new_annotations, override_existing);
}

fn merge_map(
    target: &mut Option<BTreeMap<String, String>>,
    new: &BTreeMap<String, String>,
    override_existing: bool,
) {
    if override_existing {
        *target = Some(new.clone());
        return;
    }
    let existing = target.get_or_insert_with(BTreeMap::new);
    for (key, value) in new {
        existing.insert(key.clone(), value.clone());
    }
}

/// Merge labels into the object's selector
///
/// Services keep their selector directly under `spec.selector`; every other
/// kind under `spec.selector.matchLabels`. Pods have no selector, so this is
/// a no-op for them, as it is for objects without a `spec.selector`.
pub fn update_selector_labels(
    object: &mut ManifestObject,
    new_labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let (parent, key) = match object.kind() {
        ResourceKind::Pod => return,
        ResourceKind::Service => ("/spec", "selector"),
        _ => ("/spec/selector", "matchLabels"),
    };
    if object.pointer("/spec/selector").map_or(true, Value::is_null) {
        return;
    }
    if let Some(parent) = object.pointer_mut(parent) {
        merge_json_labels(parent, key, new_labels, override_existing);
    }
}

/// Merge labels into the pod template of a workload
///
/// Pods carry them in their own metadata, CronJobs in the job template and
/// ScaledJobs in the job target; every other kind under
/// `spec.template.metadata`.
pub fn update_spec_labels(
    object: &mut ManifestObject,
    new_labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let template_metadata = match object.kind() {
        ResourceKind::Pod => {
            update_object_labels(object, new_labels, override_existing);
            return;
        }
        ResourceKind::CronJob => "/spec/jobTemplate/spec/template/metadata",
        ResourceKind::ScaledJob => "/spec/jobTargetRef/template/metadata",
        _ => "/spec/template/metadata",
    };
    if let Some(metadata) = object.pointer_mut(template_metadata) {
        merge_json_labels(metadata, "labels", new_labels, override_existing);
    }
}

fn merge_json_labels(
    parent: &mut Value,
    key: &str,
    new_labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let Some(parent) = parent.as_object_mut() else {
        return;
    };
    let new_map: Map<String, Value> = new_labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if override_existing {
        parent.insert(key.to_string(), Value::Object(new_map));
        return;
    }
    let entry = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(existing) = entry.as_object_mut() {
        existing.extend(new_map);
    }
}

/// Append (or replace) `imagePullSecrets` on a workload's pod spec
pub fn update_image_pull_secrets(
    object: &mut ManifestObject,
    secrets: &[String],
    override_existing: bool,
) {
    if secrets.is_empty() || !object.kind().is_workload() {
        return;
    }
    let pod_spec = match object.kind() {
        ResourceKind::Pod => "/spec",
        ResourceKind::CronJob => "/spec/jobTemplate/spec/template/spec",
        ResourceKind::ScaledJob => "/spec/jobTargetRef/template/spec",
        _ => "/spec/template/spec",
    };
    let Some(pod_spec) = object.pointer_mut(pod_spec).and_then(Value::as_object_mut) else {
        debug!(pointer = pod_spec, "No pod spec found, skipping image pull secrets");
        return;
    };

    let new_entries = secrets.iter().map(|name| json!({ "name": name }));
    if override_existing {
        pod_spec.insert(
            "imagePullSecrets".to_string(),
            Value::Array(new_entries.collect()),
        );
        return;
    }
    let entry = pod_spec
        .entry("imagePullSecrets".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Some(existing) = entry.as_array_mut() {
        existing.extend(new_entries);
    } else {
        *entry = Value::Array(new_entries.collect());
    }
}

/// Replica count of a workload
///
/// Replica-bearing kinds report `spec.replicas`, defaulting to 1 like the
/// API server does when the field is omitted. Every other kind reports 0.
pub fn replica_count(object: &ManifestObject) -> i32 {
    if !object.kind().has_replicas() {
        return 0;
    }
    object
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .map(|r| r.clamp(0, i64::from(i32::MAX)) as i32)
        .unwrap_or(1)
}

/// Overwrite `spec.replicas` on replica-bearing kinds
pub fn set_replica_count(object: &mut ManifestObject, replicas: i32) {
    if !object.kind().has_replicas() {
        return;
    }
    if let Some(spec) = object.pointer_mut("/spec").and_then(Value::as_object_mut) {
        spec.insert("replicas".to_string(), json!(replicas));
    }
}

/// Labels a workload's pods are matched by
///
/// Pods use their own metadata labels; everything else
/// `spec.selector.matchLabels`.
pub fn match_labels(object: &ManifestObject) -> Option<BTreeMap<String, String>> {
    if *object.kind() == ResourceKind::Pod {
        let labels = object.labels();
        return (!labels.is_empty()).then_some(labels);
    }
    object.pointer("/spec/selector/matchLabels").map(to_label_map)
}

/// `spec.selector` of a Service
pub fn service_selector(service: &ManifestObject) -> Option<BTreeMap<String, String>> {
    service
        .pointer("/spec/selector")
        .filter(|v| v.is_object())
        .map(to_label_map)
}

/// Convert a JSON label map into strings, rendering non-string values as JSON
pub fn to_label_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// True iff every `selector` entry is present in `match_labels` with the same value
///
/// An empty selector is vacuously a subset.
pub fn is_selector_subset_of(
    selector: &BTreeMap<String, String>,
    match_labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| match_labels.get(key) == Some(value))
}

/// Whether a Service targets any of the given workloads
pub fn is_service_routed(service: &ManifestObject, deployments: &[ManifestObject]) -> bool {
    let Some(selector) = service_selector(service) else {
        return false;
    };
    deployments.iter().any(|deployment| {
        match_labels(deployment).is_some_and(|labels| is_selector_subset_of(&selector, &labels))
    })
}

fn image_line_regex() -> Option<&'static Regex> {
    static IMAGE_LINE: OnceLock<Option<Regex>> = OnceLock::new();
    IMAGE_LINE
        .get_or_init(|| Regex::new(r"^ *-? *image:").ok())
        .as_ref()
}

/// Rewrite `image:` lines that reference `image_name` to `image_with_tag`
///
/// Only lines whose value names exactly `image_name` (after dropping quotes,
/// any tag or digest, and trailing comments) are rewritten; all other lines
/// are kept byte for byte.
///
/// # Example
/// `image: "repo/app"` with `repo/app:v2` becomes `image: repo/app:v2`.
pub fn substitute_image(manifest: &str, image_name: &str, image_with_tag: &str) -> String {
    if !manifest.contains(image_name) {
        return manifest.to_string();
    }

    manifest
        .split('\n')
        .map(|line| {
            let Some(keyword) = image_line_regex().and_then(|re| re.find(line)) else {
                return line.to_string();
            };
            let value: String = line[keyword.end()..]
                .trim()
                .chars()
                .filter(|c| !matches!(c, '\'' | '"' | ','))
                .collect();
            let value = value.split(' ').next().unwrap_or_default();
            if image_name_without_tag(value) == image_name {
                format!("{} {}", keyword.as_str(), image_with_tag)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip a tag or digest from an image reference
///
/// A colon only starts a tag when it comes after the last `/`, so registry
/// ports survive: `host:5000/app:v1` becomes `host:5000/app`.
pub fn image_name_without_tag(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    let last_slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[last_slash..].find(':') {
        Some(colon) => &image[..last_slash + colon],
        None => image,
    }
}

/// Apply `substitute_image` for every `images` entry whose name occurs in the text
pub fn update_container_images(manifest: &RawManifest, images: &[String]) -> RawManifest {
    let mut content = manifest.content.clone();
    for image in images {
        let name = image_name_without_tag(image);
        if !name.is_empty() && content.contains(name) {
            debug!(image = %image, origin = %manifest.origin, "Substituting image");
            content = substitute_image(&content, name, image);
        }
    }
    RawManifest {
        origin: manifest.origin.clone(),
        content,
    }
}

/// Select rollout-relevant resources from a set of objects
///
/// # Arguments
/// * `objects` - Deployed objects
/// * `kinds` - Kinds to keep, compared case-insensitively
/// * `default_namespace` - Used for objects that carry no namespace
pub fn get_resources(
    objects: &[ManifestObject],
    kinds: &[ResourceKind],
    default_namespace: &str,
) -> Vec<RolloutResource> {
    objects
        .iter()
        .filter(|object| kinds.contains(object.kind()))
        .map(|object| RolloutResource {
            kind: object.kind().clone(),
            name: object.name().to_string(),
            namespace: object
                .namespace()
                .unwrap_or(default_namespace)
                .to_string(),
        })
        .collect()
}

/// Drop cluster-assigned fields from an object fetched with `kubectl get`
///
/// Metadata keeps only `name`, `labels` and `annotations`; `status` is emptied.
pub fn strip_cluster_details(resource: &mut Value) {
    let Some(map) = resource.as_object_mut() else {
        return;
    };
    if let Some(metadata) = map.get("metadata").and_then(Value::as_object) {
        let mut kept = Map::new();
        for key in ["annotations", "labels", "name"] {
            if let Some(value) = metadata.get(key) {
                kept.insert(key.to_string(), value.clone());
            }
        }
        map.insert("metadata".to_string(), Value::Object(kept));
    }
    if map.contains_key("status") {
        map.insert("status".to_string(), Value::Object(Map::new()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "transform_test.rs"]
mod tests;
