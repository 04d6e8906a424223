//! Basic deployment strategy
//!
//! Apply the manifests as written and let Kubernetes roll them out.
//! No derived objects and no traffic routing.

use super::canary::mark_resource_as_stable;
use super::{apply_objects, DeploymentStrategyHandler, StrategyError};
use crate::controller::rollout::{Action, Context, TrafficSplitMethod};
use crate::manifest::ManifestObject;
use async_trait::async_trait;
use tracing::info;

/// Basic strategy handler
///
/// - Single apply of the input manifests
/// - With the SMI traffic-split method, workloads are labelled stable so a
///   later SMI canary's `-stable` service selects them
/// - No promote or reject phase
pub struct BasicStrategyHandler {
    pub traffic_split_method: TrafficSplitMethod,
}

#[async_trait]
impl DeploymentStrategyHandler for BasicStrategyHandler {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn deploy(
        &self,
        objects: &[ManifestObject],
        ctx: &Context,
    ) -> Result<Vec<ManifestObject>, StrategyError> {
        let deployed: Vec<ManifestObject> = match self.traffic_split_method {
            TrafficSplitMethod::Smi => objects
                .iter()
                .map(|object| {
                    if object.kind().is_deployment_entity() {
                        mark_resource_as_stable(object)
                    } else {
                        object.clone()
                    }
                })
                .collect(),
            TrafficSplitMethod::Pod => objects.to_vec(),
        };

        info!(
            objects = deployed.len(),
            method = %self.traffic_split_method,
            "Deploying manifests"
        );
        apply_objects(ctx, &deployed).await?;
        Ok(deployed)
    }

    async fn promote(&self, _objects: &[ManifestObject], _ctx: &Context) -> Result<(), StrategyError> {
        Err(StrategyError::UnsupportedAction {
            strategy: self.name(),
            action: Action::Promote,
        })
    }

    async fn reject(&self, _objects: &[ManifestObject], _ctx: &Context) -> Result<(), StrategyError> {
        Err(StrategyError::UnsupportedAction {
            strategy: self.name(),
            action: Action::Reject,
        })
    }

    fn supports_promotion(&self) -> bool {
        false
    }
}
