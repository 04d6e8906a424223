//! Strategy pattern for deploy, promote and reject
//!
//! This module defines the DeploymentStrategyHandler trait and one implementation per strategy:
//! - BasicStrategyHandler: apply the manifests as they are
//! - CanaryStrategyHandler: canary and baseline variants next to stable, split by pods or SMI
//! - BlueGreenStrategyHandler: full green copy, switched by ingress, service selector or SMI

pub mod basic;
pub mod blue_green;
pub mod canary;

use crate::controller::rollout::{
    Action, ConfigError, Context, DeployConfig, DeploymentStrategy, StabilityError,
    TrafficSplitError,
};
use crate::kubectl::{fetch_resource, KubectlError};
use crate::manifest::{
    ManifestError, ManifestObject, ResourceIdentifier, ResourceKind, StoreError,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// Errors specific to strategy execution
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Promote refused because the cluster is not in the routed state
    #[error("{message}: {}", resources.join(", "))]
    State {
        message: String,
        resources: Vec<String>,
    },

    #[error("{action} is not supported by the {strategy} strategy")]
    UnsupportedAction {
        strategy: &'static str,
        action: Action,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Kubectl(#[from] KubectlError),

    #[error(transparent)]
    TrafficSplit(#[from] TrafficSplitError),

    #[error(transparent)]
    Stability(#[from] StabilityError),
}

/// Errors from best-effort cleanup, logged by the caller and never propagated
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Failed to delete {target}: {message}")]
    DeleteFailed { target: String, message: String },

    #[error(transparent)]
    Kubectl(#[from] KubectlError),
}

/// Strategy trait for the three deployment strategies
///
/// # Design Principles
/// - Derived resource names are deterministic, so every method is safe to re-run
/// - Cleanup deletes are best effort; only applies and state checks fail a run
///
/// # Example
/// ```ignore
/// let strategy = select_strategy(&ctx.config);
/// let deployed = strategy.deploy(&objects, &ctx).await?;
/// check_manifest_stability(&ctx, &get_resources(&deployed, STABILITY_KINDS, ns)).await?;
/// strategy.route(&objects, &ctx).await?;
/// ```
#[async_trait]
pub trait DeploymentStrategyHandler: Send + Sync {
    /// Strategy name for logging ("basic", "canary", "blue-green")
    fn name(&self) -> &'static str;

    /// Apply the objects for a new version
    ///
    /// # Arguments
    /// * `objects` - Input manifests, images and pull secrets already applied
    /// * `ctx` - Deployment context
    ///
    /// # Returns
    /// The objects actually applied, for stability checks and annotation
    async fn deploy(
        &self,
        objects: &[ManifestObject],
        ctx: &Context,
    ) -> Result<Vec<ManifestObject>, StrategyError>;

    /// Switch traffic once deployed objects are stable
    ///
    /// Only blue-green routes at deploy time; the default does nothing.
    async fn route(&self, _objects: &[ManifestObject], _ctx: &Context) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Make the new version the stable one and clean up
    ///
    /// # Returns
    /// * `Err(StrategyError::State)` - Cluster not in a promotable state, nothing applied
    async fn promote(&self, objects: &[ManifestObject], ctx: &Context)
        -> Result<(), StrategyError>;

    /// Discard the new version and restore stable routing
    async fn reject(&self, objects: &[ManifestObject], ctx: &Context) -> Result<(), StrategyError>;

    /// Does this strategy have promote and reject phases?
    fn supports_promotion(&self) -> bool;
}

/// Select the strategy handler for the configuration
///
/// # Strategy Selection Rules
/// 1. `basic` → BasicStrategyHandler (SMI traffic-split method marks workloads stable)
/// 2. `canary` → CanaryStrategyHandler with the configured traffic-split method
/// 3. `blue-green` → BlueGreenStrategyHandler with the configured route method
pub fn select_strategy(config: &DeployConfig) -> Box<dyn DeploymentStrategyHandler> {
    use crate::controller::strategies::{
        basic::BasicStrategyHandler, blue_green::BlueGreenStrategyHandler,
        canary::CanaryStrategyHandler,
    };

    match config.strategy {
        DeploymentStrategy::Basic => Box::new(BasicStrategyHandler {
            traffic_split_method: config.traffic_split_method,
        }),
        DeploymentStrategy::Canary => Box::new(CanaryStrategyHandler {
            traffic_split_method: config.traffic_split_method,
        }),
        DeploymentStrategy::BlueGreen => Box::new(BlueGreenStrategyHandler {
            route_method: config.route_method,
        }),
    }
}

/// Write objects to temp files and `kubectl apply` them; a failed apply is fatal
///
/// # Arguments
/// * `ctx` - Deployment context (store, kubectl, `force`)
/// * `objects` - Objects to apply; an empty list is a no-op
pub async fn apply_objects(ctx: &Context, objects: &[ManifestObject]) -> Result<(), StrategyError> {
    if objects.is_empty() {
        debug!("Nothing to apply");
        return Ok(());
    }

    let files = ctx.store.write_temp(objects)?;
    info!(
        objects = objects.len(),
        force = ctx.config.force,
        "Applying manifests"
    );
    for object in objects {
        debug!(resource = %object, "Applying");
    }

    ctx.kubectl
        .apply(&files, ctx.config.force)
        .await?
        .check("apply")?;
    Ok(())
}

/// Fetch an object from the cluster as a derivation source
///
/// Cluster-assigned details are stripped; a missing object is `None`.
pub async fn fetch_existing(
    ctx: &Context,
    kind: &ResourceKind,
    name: &str,
) -> Result<Option<ManifestObject>, StrategyError> {
    let target = ResourceIdentifier::new(kind.as_str(), name);
    match fetch_resource(ctx.kubectl.as_ref(), &target).await? {
        Some(value) => Ok(Some(ManifestObject::from_value(value)?)),
        None => Ok(None),
    }
}

/// Delete one resource
pub async fn delete_resource(ctx: &Context, target: &ResourceIdentifier) -> Result<(), CleanupError> {
    let result = ctx.kubectl.delete(target).await?;
    if result.is_success() {
        info!(resource = %target, "Deleted resource");
        Ok(())
    } else {
        Err(CleanupError::DeleteFailed {
            target: target.to_string(),
            message: result.stderr.trim().to_string(),
        })
    }
}

/// Delete resources one by one, logging failures and carrying on
///
/// A failed delete almost always means the object is already gone.
pub async fn delete_objects(ctx: &Context, targets: &[ResourceIdentifier]) {
    for target in targets {
        if let Err(e) = delete_resource(ctx, target).await {
            debug!(resource = %target, error = %e, "Delete failed, resource likely absent");
        }
    }
}
