use crate::controller::clock::Clock;
use crate::controller::rollout::report::{annotate_and_label, print_ingresses};
use crate::controller::rollout::status::{check_manifest_stability, StabilityError};
use crate::controller::rollout::validation::{Action, ConfigError, DeployConfig};
use crate::controller::strategies::{select_strategy, StrategyError};
use crate::kubectl::KubectlGateway;
use crate::manifest::transform::{get_resources, update_container_images, update_image_pull_secrets};
use crate::manifest::{
    parse_manifests, ManifestError, ManifestObject, ManifestStore, RawManifest, ResourceKind,
    StoreError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Kinds whose stability is checked after a deploy
pub const STABILITY_KINDS: &[ResourceKind] = &[
    ResourceKind::Deployment,
    ResourceKind::ReplicaSet,
    ResourceKind::DaemonSet,
    ResourceKind::Pod,
    ResourceKind::StatefulSet,
    ResourceKind::Service,
];

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Failed to read manifests: {0}")]
    StoreError(#[from] StoreError),

    #[error("Invalid manifest: {0}")]
    ManifestError(#[from] ManifestError),

    #[error("Strategy failed: {0}")]
    StrategyError(#[from] StrategyError),

    #[error("Rollout is not stable: {0}")]
    StabilityError(#[from] StabilityError),
}

pub struct Context {
    pub kubectl: Arc<dyn KubectlGateway>,
    pub store: ManifestStore,
    pub clock: Arc<dyn Clock>,
    pub config: DeployConfig,
    /// `split.smi-spec.io` version, resolved on first SMI operation
    traffic_split_api_version: OnceCell<String>,
}

impl Context {
    pub fn new(
        kubectl: Arc<dyn KubectlGateway>,
        store: ManifestStore,
        clock: Arc<dyn Clock>,
        config: DeployConfig,
    ) -> Self {
        Context {
            kubectl,
            store,
            clock,
            config,
            traffic_split_api_version: OnceCell::new(),
        }
    }

    /// Pin the TrafficSplit api version instead of discovering it
    pub fn with_traffic_split_api_version(mut self, version: impl Into<String>) -> Self {
        self.traffic_split_api_version = OnceCell::new_with(Some(version.into()));
        self
    }

    pub fn traffic_split_api_version_cache(&self) -> &OnceCell<String> {
        &self.traffic_split_api_version
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)] // Test helper - panicking is acceptable
    pub fn new_mock(config: DeployConfig) -> MockContext {
        use crate::controller::clock::MockClock;
        use crate::kubectl::fake::FakeKubectl;

        let temp_dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(temp_dir.path().join("applied")).unwrap();
        let kubectl = Arc::new(FakeKubectl::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));

        let ctx = Context::new(kubectl.clone(), store, clock.clone(), config);
        MockContext {
            ctx,
            kubectl,
            clock,
            temp_dir,
        }
    }
}

/// Context wired to in-memory collaborators, plus handles to inspect them
#[cfg(test)]
pub struct MockContext {
    pub ctx: Context,
    pub kubectl: Arc<crate::kubectl::fake::FakeKubectl>,
    pub clock: Arc<crate::controller::clock::MockClock>,
    pub temp_dir: tempfile::TempDir,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockContext {
    /// Write a manifest file and add it to the configured sources
    pub fn add_manifest(&mut self, file_name: &str, content: &str) -> String {
        let path = self.temp_dir.path().join(file_name);
        std::fs::write(&path, content).unwrap();
        let path = path.display().to_string();
        self.ctx.config.manifests.push(path.clone());
        path
    }
}

/// Read the configured manifests and parse them into objects
///
/// For deploy and promote the `images` and `imagepullsecrets` inputs are
/// applied first; reject works on the manifests as written.
///
/// # Arguments
/// * `ctx` - Deployment context
/// * `update` - Substitute images and append pull secrets
///
/// # Returns
/// Objects in file order, then document order
pub async fn load_manifests(
    ctx: &Context,
    update: bool,
) -> Result<Vec<ManifestObject>, DeployError> {
    let config = &ctx.config;
    let raw = ctx.store.read_all(&config.manifests).await?;
    if raw.is_empty() {
        return Err(ConfigError::NoManifests.into());
    }

    let raw: Vec<RawManifest> = if update && !config.images.is_empty() {
        raw.iter()
            .map(|manifest| update_container_images(manifest, &config.images))
            .collect()
    } else {
        raw
    };

    let mut objects = parse_manifests(&raw)?;
    if update && !config.image_pull_secrets.is_empty() {
        for object in &mut objects {
            update_image_pull_secrets(object, &config.image_pull_secrets, false);
        }
    }

    debug!(
        sources = raw.len(),
        objects = objects.len(),
        "Loaded manifests"
    );
    Ok(objects)
}

/// Run the configured action end to end
///
/// Deploy applies through the selected strategy, waits for stability,
/// routes traffic (blue-green), prints the input ingresses as routed and
/// annotates what was deployed. Promote and reject are delegated to the strategy, which runs
/// its own stability checks.
///
/// # Arguments
/// * `ctx` - Deployment context holding the validated configuration
///
/// # Returns
/// * `Ok(())` - Action completed
/// * `Err(DeployError)` - First fatal error; best-effort steps never end up here
///
/// # Example
/// ```ignore
/// let ctx = Context::new(kubectl, store, Arc::new(SystemClock), config);
/// run(&ctx).await?;
/// ```
pub async fn run(ctx: &Context) -> Result<(), DeployError> {
    let config = &ctx.config;
    let strategy = select_strategy(config);

    info!(
        action = %config.action,
        strategy = strategy.name(),
        namespace = %config.namespace,
        "Starting deployment action"
    );

    let objects = load_manifests(ctx, config.action != Action::Reject).await?;

    match config.action {
        Action::Deploy => {
            let deployed = strategy.deploy(&objects, ctx).await?;

            let resources = get_resources(&deployed, STABILITY_KINDS, &config.namespace);
            check_manifest_stability(ctx, &resources).await?;

            strategy.route(&objects, ctx).await?;

            print_ingresses(ctx, &objects).await;
            annotate_and_label(ctx, &deployed).await;
        }
        Action::Promote => strategy.promote(&objects, ctx).await?,
        Action::Reject => strategy.reject(&objects, ctx).await?,
    }

    info!(
        action = %config.action,
        strategy = strategy.name(),
        "Deployment action completed"
    );
    Ok(())
}
