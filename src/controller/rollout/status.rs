//! Post-apply stability verification
//!
//! Workloads with rollout support are checked with `kubectl rollout status`,
//! pods and LoadBalancer services are polled on a fixed interval. Rollout
//! failures are aggregated and reported once every resource was visited; pod
//! and service timeouts only produce warnings.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::{PodStatus, ServiceSpec, ServiceStatus};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::controller::clock::Clock;
use crate::controller::rollout::Context;
use crate::kubectl::{describe_for_diagnostics, fetch_raw_resource, KubectlError};
use crate::manifest::{ResourceKind, RolloutResource};

/// Errors from the stability check
#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("Rollout status error for: {}", .0.join(", "))]
    RolloutFailed(Vec<String>),

    #[error("Invalid {kind} status: {message}")]
    InvalidStatus { kind: String, message: String },

    #[error(transparent)]
    Kubectl(#[from] KubectlError),
}

/// Interval and attempt ceiling of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Pods: 60 polls 10s apart (10 minutes)
pub const POD_STATUS_POLL: PollSettings = PollSettings {
    interval: Duration::from_secs(10),
    max_attempts: 60,
};

/// LoadBalancer services: 18 polls 10s apart (3 minutes)
pub const SERVICE_IP_POLL: PollSettings = PollSettings {
    interval: Duration::from_secs(10),
    max_attempts: 18,
};

/// What a single probe saw
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    /// Terminal and healthy, stop polling
    Ready(T),
    /// Not there yet, poll again
    Pending(Option<T>),
    /// Terminal and unhealthy, stop polling
    Failed(T),
}

/// Result of a bounded polling loop
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Stable(T),
    /// Ceiling reached; carries the last pending observation, if any
    TimedOut(Option<T>),
    Failed(T),
}

/// Poll `probe` until it reports a terminal observation or the ceiling is hit
///
/// Sleeps `settings.interval` before every probe, so a freshly applied object
/// gets one interval before it is first looked at.
///
/// # Arguments
/// * `clock` - Clock used for the waits
/// * `settings` - Interval and attempt ceiling
/// * `probe` - Called once per attempt
///
/// # Returns
/// The typed outcome, or the first error returned by `probe`
pub async fn poll_until<T, E, F, Fut>(
    clock: &dyn Clock,
    settings: PollSettings,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<T>, E>>,
{
    let mut last = None;
    for attempt in 1..=settings.max_attempts {
        clock.sleep(settings.interval).await;
        match probe().await? {
            Observation::Ready(value) => return Ok(PollOutcome::Stable(value)),
            Observation::Failed(value) => return Ok(PollOutcome::Failed(value)),
            Observation::Pending(value) => {
                debug!(attempt, max_attempts = settings.max_attempts, "Still waiting");
                if value.is_some() {
                    last = value;
                }
            }
        }
    }
    Ok(PollOutcome::TimedOut(last))
}

/// Verify that deployed resources reached a stable state
///
/// Every resource is visited even after a failure. Rollout-status failures
/// and failed pods are collected and returned together at the end.
///
/// # Arguments
/// * `ctx` - Deployment context
/// * `resources` - Resources selected from the deployed objects
///
/// # Returns
/// * `Ok(())` - No resource failed
/// * `Err(StabilityError::RolloutFailed)` - Names of the failed resources
pub async fn check_manifest_stability(
    ctx: &Context,
    resources: &[RolloutResource],
) -> Result<(), StabilityError> {
    let mut failed = Vec::new();

    for resource in resources {
        let target = resource.identifier();

        if resource.kind.has_rollout_status() {
            let result = ctx
                .kubectl
                .rollout_status(&target)
                .await
                .and_then(|r| r.check(&format!("rollout status {target}")));
            match result {
                Ok(_) => info!(resource = %target, "Rollout succeeded"),
                Err(e) => {
                    error!(resource = %target, error = %e, "Rollout status check failed");
                    describe_for_diagnostics(ctx.kubectl.as_ref(), &target).await;
                    failed.push(target.to_string());
                }
            }
        }

        match resource.kind {
            ResourceKind::Pod => match check_pod_status(ctx, resource).await {
                Ok(PodCheck::Failed) => failed.push(target.to_string()),
                Ok(_) => {}
                Err(e) => {
                    warn!(resource = %target, error = %e, "Could not determine pod status");
                    describe_for_diagnostics(ctx.kubectl.as_ref(), &target).await;
                }
            },
            ResourceKind::Service => {
                if let Err(e) = check_service_status(ctx, resource).await {
                    warn!(resource = %target, error = %e, "Could not determine service status");
                    describe_for_diagnostics(ctx.kubectl.as_ref(), &target).await;
                }
            }
            _ => {}
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(StabilityError::RolloutFailed(failed))
    }
}

/// Verdict of a pod check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCheck {
    Ready,
    /// Terminal phase reached but some container is not ready
    NotReady,
    TimedOut,
    Failed,
}

/// Poll a pod until its phase leaves Pending/Unknown
///
/// Only a `Failed` phase is treated as a failure. A timeout or unready
/// containers are logged and followed by a `describe` dump.
pub async fn check_pod_status(
    ctx: &Context,
    pod: &RolloutResource,
) -> Result<PodCheck, StabilityError> {
    let target = pod.identifier();

    let outcome = poll_until(ctx.clock.as_ref(), POD_STATUS_POLL, move || async move {
        debug!(pod = %pod.name, "Polling for pod status");
        let status: Option<PodStatus> = fetch_status(ctx, pod, "status").await?;
        Ok::<_, StabilityError>(match status {
            None => Observation::Pending(None),
            Some(status) => match status.phase.as_deref() {
                Some("Pending") | Some("Unknown") | None => Observation::Pending(Some(status)),
                Some("Failed") => Observation::Failed(status),
                Some(_) => Observation::Ready(status),
            },
        })
    })
    .await?;

    let verdict = match outcome {
        PollOutcome::Stable(status) => {
            if is_pod_ready(&status) {
                info!(pod = %pod.name, "Pod is successfully rolled out");
                PodCheck::Ready
            } else {
                warn!(pod = %pod.name, "All containers not in ready state");
                PodCheck::NotReady
            }
        }
        PollOutcome::Failed(_) => {
            error!(pod = %pod.name, "Pod rollout failed");
            PodCheck::Failed
        }
        PollOutcome::TimedOut(status) => {
            let phase = status
                .and_then(|s| s.phase)
                .unwrap_or_else(|| "Unknown".to_string());
            warn!(pod = %pod.name, phase = %phase, "Pod rollout status check timed out");
            PodCheck::TimedOut
        }
    };

    if verdict != PodCheck::Ready {
        describe_for_diagnostics(ctx.kubectl.as_ref(), &target).await;
    }
    Ok(verdict)
}

/// Every container reports `ready: true`
pub fn is_pod_ready(status: &PodStatus) -> bool {
    let mut all_ready = true;
    for container in status.container_statuses.iter().flatten() {
        if !container.ready {
            info!(
                container = %container.name,
                state = ?container.state,
                "Container not ready"
            );
            all_ready = false;
        }
    }
    all_ready
}

/// Wait for an external IP on LoadBalancer services; other types pass
async fn check_service_status(
    ctx: &Context,
    service: &RolloutResource,
) -> Result<(), StabilityError> {
    let spec: ServiceSpec = fetch_status(ctx, service, "spec")
        .await?
        .ok_or_else(|| StabilityError::InvalidStatus {
            kind: "service".to_string(),
            message: format!("{} not found", service.name),
        })?;
    if spec.type_.as_deref() != Some("LoadBalancer") {
        return Ok(());
    }

    let status: Option<ServiceStatus> = fetch_status(ctx, service, "status").await?;
    if let Some(ip) = status.as_ref().and_then(external_ip) {
        info!(service = %service.name, ip = %ip, "ServiceExternalIP");
        return Ok(());
    }
    wait_for_service_external_ip(ctx, service).await
}

/// Poll a LoadBalancer service until `status.loadBalancer.ingress` is set
///
/// Timing out is a warning only.
pub async fn wait_for_service_external_ip(
    ctx: &Context,
    service: &RolloutResource,
) -> Result<(), StabilityError> {
    info!(service = %service.name, "Waiting for service external IP assignment");

    let outcome = poll_until(ctx.clock.as_ref(), SERVICE_IP_POLL, move || async move {
        let status: Option<ServiceStatus> = fetch_status(ctx, service, "status").await?;
        Ok::<_, StabilityError>(match status.as_ref().and_then(external_ip) {
            Some(ip) => Observation::Ready(ip),
            None => Observation::Pending(None),
        })
    })
    .await?;

    match outcome {
        PollOutcome::Stable(ip) => {
            info!(service = %service.name, ip = %ip, "ServiceExternalIP");
        }
        PollOutcome::TimedOut(_) | PollOutcome::Failed(_) => {
            warn!(service = %service.name, "Wait for service ip assignment timed out");
        }
    }
    Ok(())
}

/// First load balancer ingress address, IP preferred over hostname
fn external_ip(status: &ServiceStatus) -> Option<String> {
    let ingress = status.load_balancer.as_ref()?.ingress.as_ref()?.first()?;
    ingress.ip.clone().or_else(|| ingress.hostname.clone())
}

/// Fetch a resource and deserialize one of its top-level fields
///
/// `Ok(None)` when the resource does not exist.
async fn fetch_status<T: DeserializeOwned + Default>(
    ctx: &Context,
    resource: &RolloutResource,
    field: &str,
) -> Result<Option<T>, StabilityError> {
    let Some(mut object) = fetch_raw_resource(ctx.kubectl.as_ref(), &resource.identifier()).await?
    else {
        return Ok(None);
    };
    match object.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => Ok(Some(T::default())),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StabilityError::InvalidStatus {
                kind: resource.kind.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "status_test.rs"]
mod tests;
