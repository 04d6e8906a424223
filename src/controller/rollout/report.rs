//! Post-deploy reporting: ingress dump, annotations and labels
//!
//! Everything here is best effort. Failures are logged as warnings and never
//! turn a successful deploy into a failed one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::rollout::validation::{Action, DeployConfig, DeploymentStrategy};
use crate::controller::rollout::Context;
use crate::kubectl::{fetch_raw_resource, ExecResult, KubectlError};
use crate::manifest::{ManifestObject, ResourceIdentifier, ResourceKind};

/// Annotation written on every deployed object and the namespace
pub const DEPLOYMENT_ANNOTATION_KEY: &str = "kdeploy.io/deployment";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by=kdeploy";

/// Value of the deployment annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub action: Action,
    pub strategy: DeploymentStrategy,
    pub timestamp: String,
}

impl DeploymentRecord {
    pub fn new(config: &DeployConfig, now: DateTime<Utc>) -> Self {
        Self {
            action: config.action,
            strategy: config.strategy,
            timestamp: now.to_rfc3339(),
        }
    }

    /// `key=value` argument for `kubectl annotate`
    pub fn annotation(&self) -> Result<String, serde_json::Error> {
        Ok(format!(
            "{DEPLOYMENT_ANNOTATION_KEY}={}",
            serde_json::to_string(self)?
        ))
    }
}

/// Print the JSON of every Ingress as the cluster reports it
pub async fn print_ingresses(ctx: &Context, objects: &[ManifestObject]) {
    for ingress in objects
        .iter()
        .filter(|o| *o.kind() == ResourceKind::Ingress)
    {
        let target = ingress.identifier();
        match fetch_raw_resource(ctx.kubectl.as_ref(), &target).await {
            Ok(Some(value)) => {
                let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
                println!("{pretty}");
            }
            Ok(None) => warn!(ingress = %target, "Ingress not found after deploy"),
            Err(e) => warn!(ingress = %target, error = %e, "Failed to fetch ingress"),
        }
    }
}

/// Annotate and label deployed objects, and annotate the namespace
///
/// The namespace is skipped when `annotate-namespace` is false. User
/// annotations are written next to the deployment record.
pub async fn annotate_and_label(ctx: &Context, deployed: &[ManifestObject]) {
    let config = &ctx.config;
    let record = DeploymentRecord::new(config, ctx.clock.now());
    let mut annotations = match record.annotation() {
        Ok(annotation) => vec![annotation],
        Err(e) => {
            warn!(error = %e, "Failed to serialize deployment annotation");
            Vec::new()
        }
    };
    annotations.extend(config.annotations.iter().map(|(k, v)| format!("{k}={v}")));

    if config.annotate_namespace {
        let namespace = ResourceIdentifier::new("namespace", &config.namespace);
        for annotation in &annotations {
            report(
                "annotate",
                &namespace,
                ctx.kubectl.annotate(&namespace, annotation).await,
            );
        }
    }

    for object in deployed {
        let target = object.identifier();
        for annotation in &annotations {
            report(
                "annotate",
                &target,
                ctx.kubectl.annotate(&target, annotation).await,
            );
        }
        report(
            "label",
            &target,
            ctx.kubectl.label(&target, MANAGED_BY_LABEL).await,
        );
    }

    info!(objects = deployed.len(), "Annotated deployed resources");
}

fn report(verb: &str, target: &ResourceIdentifier, result: Result<ExecResult, KubectlError>) {
    match result.and_then(|r| r.check(verb)) {
        Ok(_) => debug!(resource = %target, verb, "Updated resource metadata"),
        Err(e) => warn!(resource = %target, verb, error = %e, "Failed to update resource metadata"),
    }
}
