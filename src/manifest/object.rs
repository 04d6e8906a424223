//! Typed view over a single Kubernetes manifest document

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{DynamicObject, TypeMeta};
use serde::Deserialize;
use serde_json::Value;

use super::ManifestError;

/// Kind of a manifest object, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Pod,
    Job,
    CronJob,
    ScaledJob,
    Service,
    Ingress,
    TrafficSplit,
    Other(String),
}

impl ResourceKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "deployment" => ResourceKind::Deployment,
            "replicaset" => ResourceKind::ReplicaSet,
            "statefulset" => ResourceKind::StatefulSet,
            "daemonset" => ResourceKind::DaemonSet,
            "pod" => ResourceKind::Pod,
            "job" => ResourceKind::Job,
            "cronjob" => ResourceKind::CronJob,
            "scaledjob" => ResourceKind::ScaledJob,
            "service" => ResourceKind::Service,
            "ingress" => ResourceKind::Ingress,
            "trafficsplit" => ResourceKind::TrafficSplit,
            _ => ResourceKind::Other(kind.to_string()),
        }
    }

    /// Lower-case kind name as passed to kubectl
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::ReplicaSet => "replicaset",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::Pod => "pod",
            ResourceKind::Job => "job",
            ResourceKind::CronJob => "cronjob",
            ResourceKind::ScaledJob => "scaledjob",
            ResourceKind::Service => "service",
            ResourceKind::Ingress => "ingress",
            ResourceKind::TrafficSplit => "trafficsplit",
            ResourceKind::Other(kind) => kind.as_str(),
        }
    }

    /// Kinds that canary and blue-green derive variants of
    pub fn is_deployment_entity(&self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment
                | ResourceKind::ReplicaSet
                | ResourceKind::DaemonSet
                | ResourceKind::Pod
                | ResourceKind::StatefulSet
        )
    }

    /// Kinds that carry containers, used for image and pull-secret edits
    pub fn is_workload(&self) -> bool {
        self.is_deployment_entity()
            || matches!(
                self,
                ResourceKind::Job | ResourceKind::CronJob | ResourceKind::ScaledJob
            )
    }

    /// Kinds supported by `kubectl rollout status`
    pub fn has_rollout_status(&self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment | ResourceKind::DaemonSet | ResourceKind::StatefulSet
        )
    }

    /// Kinds whose `spec.replicas` is meaningful
    pub fn has_replicas(&self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment | ResourceKind::ReplicaSet | ResourceKind::StatefulSet
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(kind, name, namespace)` triple addressing one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentifier {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceIdentifier {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Rollout-relevant resource selected from deployed objects for stability checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutResource {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
}

impl RolloutResource {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.kind.as_str(), &self.name)
            .in_namespace(Some(self.namespace.clone()))
    }
}

/// Raw manifest text together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub origin: String,
    pub content: String,
}

/// One validated manifest object
///
/// Every object has a kind, an apiVersion and a non-empty `metadata.name`;
/// `from_value` refuses anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    kind: ResourceKind,
    object: DynamicObject,
}

impl ManifestObject {
    /// Validate and wrap a JSON document
    pub fn from_value(value: Value) -> Result<Self, ManifestError> {
        Self::from_value_in(value, "<inline>")
    }

    fn from_value_in(value: Value, origin: &str) -> Result<Self, ManifestError> {
        let map = value
            .as_object()
            .ok_or_else(|| ManifestError::NotAMapping(origin.to_string()))?;

        for field in ["kind", "apiVersion"] {
            match map.get(field).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => {}
                _ => {
                    return Err(ManifestError::MissingField {
                        origin: origin.to_string(),
                        field,
                    })
                }
            }
        }

        let name = map
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str);
        if name.map_or(true, str::is_empty) {
            return Err(ManifestError::MissingField {
                origin: origin.to_string(),
                field: "metadata.name",
            });
        }

        let object: DynamicObject =
            serde_json::from_value(value).map_err(|e| ManifestError::Invalid {
                origin: origin.to_string(),
                message: e.to_string(),
            })?;
        let kind = ResourceKind::from_kind(
            object
                .types
                .as_ref()
                .map(|t| t.kind.as_str())
                .unwrap_or_default(),
        );

        Ok(Self { kind, object })
    }

    /// Build an object from its parts
    pub fn new(api_version: &str, kind: &str, metadata: ObjectMeta, data: Value) -> Self {
        Self {
            kind: ResourceKind::from_kind(kind),
            object: DynamicObject {
                types: Some(TypeMeta {
                    api_version: api_version.to_string(),
                    kind: kind.to_string(),
                }),
                metadata,
                data,
            },
        }
    }

    pub fn to_value(&self) -> Result<Value, ManifestError> {
        serde_json::to_value(&self.object).map_err(|e| ManifestError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(&self.object)
            .map_err(|e| ManifestError::Serialization(e.to_string()))
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Kind exactly as written in the manifest
    pub fn kind_name(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.api_version.as_str())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.object.metadata.name = Some(name.into());
    }

    /// Clone under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut renamed = self.clone();
        renamed.set_name(name);
        renamed
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.object.metadata
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.object.metadata.labels.clone().unwrap_or_default()
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.object.metadata.annotations.clone().unwrap_or_default()
    }

    /// Everything outside `apiVersion`, `kind` and `metadata`
    pub fn data(&self) -> &Value {
        &self.object.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.object.data
    }

    /// JSON-pointer lookup relative to the object body, e.g. `/spec/replicas`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.object.data.pointer(pointer)
    }

    pub fn pointer_mut(&mut self, pointer: &str) -> Option<&mut Value> {
        self.object.data.pointer_mut(pointer)
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.kind_name(), self.name())
            .in_namespace(self.namespace().map(str::to_string))
    }
}

impl fmt::Display for ManifestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind_name(), self.name())
    }
}

/// Parse every YAML document of every raw manifest
///
/// Empty documents (`---` separators with nothing between them) are skipped.
pub fn parse_manifests(raw: &[RawManifest]) -> Result<Vec<ManifestObject>, ManifestError> {
    let mut objects = Vec::new();
    for manifest in raw {
        objects.extend(parse_documents(&manifest.origin, &manifest.content)?);
    }
    Ok(objects)
}

/// Parse a multi-document YAML (or JSON) string
pub fn parse_documents(origin: &str, content: &str) -> Result<Vec<ManifestObject>, ManifestError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| ManifestError::Yaml {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(value).map_err(|e| ManifestError::Yaml {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        objects.push(ManifestObject::from_value_in(json, origin)?);
    }
    Ok(objects)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "object_test.rs"]
mod tests;
