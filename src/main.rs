use clap::Parser;
use kdeploy::controller::clock::SystemClock;
use kdeploy::controller::rollout::ConfigArgs;
use kdeploy::controller::{run, Context, DeployConfig};
use kdeploy::kubectl::Kubectl;
use kdeploy::manifest::ManifestStore;
use std::sync::Arc;
use tracing::{error, info};

/// Deploy, promote or reject Kubernetes manifests
#[derive(Parser, Debug)]
#[command(name = "kdeploy", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Log output format: text or json
    #[arg(long, env = "KDEPLOY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Initialize tracing, honouring `RUST_LOG` and falling back to `info`
fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    let config = match DeployConfig::from_args(cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let kubectl = Kubectl::new(
        &config.kubectl_path,
        &config.namespace,
        config.insecure_skip_tls_verify,
    );
    let store = ManifestStore::in_system_temp()?;
    info!(
        temp_dir = %store.temp_dir().display(),
        "Writing derived manifests to temp directory"
    );

    let ctx = Context::new(Arc::new(kubectl), store, Arc::new(SystemClock), config);

    if let Err(e) = run(&ctx).await {
        error!(error = %e, "Deployment action failed");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "main_test.rs"]
mod tests;
