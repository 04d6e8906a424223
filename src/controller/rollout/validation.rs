use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Args;
use serde::Serialize;
use thiserror::Error;

/// Upper bound for the version-switch buffer, in seconds
pub const MAX_VERSION_SWITCH_BUFFER_SECS: i64 = 300;

/// Errors in configuration values, raised before any cluster call
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid action '{0}': expected deploy, promote or reject")]
    InvalidAction(String),

    #[error("Invalid strategy '{0}': expected basic, canary or blue-green")]
    InvalidStrategy(String),

    #[error("Invalid route method '{0}': expected ingress, smi or service")]
    InvalidRouteMethod(String),

    #[error("Invalid traffic split method '{0}': expected pod or smi")]
    InvalidTrafficSplitMethod(String),

    #[error("percentage must be between 0 and 100, got {0}")]
    PercentageOutOfRange(i64),

    #[error("baseline-and-canary-replicas must be between 0 and 100, got {0}")]
    ReplicasOutOfRange(i64),

    #[error("version-switch-buffer must be between 0 and {MAX_VERSION_SWITCH_BUFFER_SECS} seconds, got {0}")]
    BufferOutOfRange(i64),

    #[error("percentage is required for canary {0}")]
    MissingPercentage(Action),

    #[error("No manifests supplied")]
    NoManifests,

    #[error("Invalid annotation '{0}': expected key=value")]
    InvalidAnnotation(String),
}

/// Phase to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deploy,
    Promote,
    Reject,
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deploy" => Ok(Action::Deploy),
            "promote" => Ok(Action::Promote),
            "reject" => Ok(Action::Reject),
            _ => Err(ConfigError::InvalidAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Deploy => "deploy",
            Action::Promote => "promote",
            Action::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStrategy {
    Basic,
    Canary,
    BlueGreen,
}

impl FromStr for DeploymentStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(DeploymentStrategy::Basic),
            "canary" => Ok(DeploymentStrategy::Canary),
            "blue-green" => Ok(DeploymentStrategy::BlueGreen),
            _ => Err(ConfigError::InvalidStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentStrategy::Basic => "basic",
            DeploymentStrategy::Canary => "canary",
            DeploymentStrategy::BlueGreen => "blue-green",
        })
    }
}

/// How blue-green switches traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStrategy {
    Ingress,
    Smi,
    Service,
}

impl FromStr for RouteStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingress" => Ok(RouteStrategy::Ingress),
            "smi" => Ok(RouteStrategy::Smi),
            "service" => Ok(RouteStrategy::Service),
            _ => Err(ConfigError::InvalidRouteMethod(s.to_string())),
        }
    }
}

impl fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteStrategy::Ingress => "ingress",
            RouteStrategy::Smi => "smi",
            RouteStrategy::Service => "service",
        })
    }
}

/// How canary traffic is apportioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficSplitMethod {
    Pod,
    Smi,
}

impl FromStr for TrafficSplitMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pod" => Ok(TrafficSplitMethod::Pod),
            "smi" => Ok(TrafficSplitMethod::Smi),
            _ => Err(ConfigError::InvalidTrafficSplitMethod(s.to_string())),
        }
    }
}

impl fmt::Display for TrafficSplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrafficSplitMethod::Pod => "pod",
            TrafficSplitMethod::Smi => "smi",
        })
    }
}

/// Raw configuration, from flags or `KDEPLOY_*` environment variables
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Phase to run: deploy, promote or reject
    #[arg(long, env = "KDEPLOY_ACTION")]
    pub action: String,

    /// Manifest files, directories or https URLs, separated by newlines, commas or semicolons
    #[arg(long, env = "KDEPLOY_MANIFESTS")]
    pub manifests: String,

    /// basic, canary or blue-green
    #[arg(long, env = "KDEPLOY_STRATEGY", default_value = "basic")]
    pub strategy: String,

    /// Blue-green routing: ingress, smi or service
    #[arg(long, env = "KDEPLOY_ROUTE_METHOD", default_value = "service")]
    pub route_method: String,

    /// Canary traffic split: pod or smi
    #[arg(long, env = "KDEPLOY_TRAFFIC_SPLIT_METHOD", default_value = "pod")]
    pub traffic_split_method: String,

    /// Canary traffic percentage (0-100)
    #[arg(long, env = "KDEPLOY_PERCENTAGE", allow_hyphen_values = true)]
    pub percentage: Option<i64>,

    /// Fixed baseline and canary replica count for SMI canaries (0-100)
    #[arg(long, env = "KDEPLOY_BASELINE_AND_CANARY_REPLICAS", allow_hyphen_values = true)]
    pub baseline_and_canary_replicas: Option<i64>,

    /// Seconds to wait between creating green objects and routing to them (0-300)
    #[arg(long, env = "KDEPLOY_VERSION_SWITCH_BUFFER", default_value_t = 0, allow_hyphen_values = true)]
    pub version_switch_buffer: i64,

    /// Fully qualified images to substitute, separated by newlines or commas
    #[arg(long, env = "KDEPLOY_IMAGES", default_value = "")]
    pub images: String,

    /// Image pull secret names, separated by newlines or commas
    #[arg(long, env = "KDEPLOY_IMAGEPULLSECRETS", default_value = "")]
    pub imagepullsecrets: String,

    #[arg(long, env = "KDEPLOY_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Pass --force to kubectl apply
    #[arg(long, env = "KDEPLOY_FORCE")]
    pub force: bool,

    /// Path to the kubectl binary
    #[arg(long, env = "KDEPLOY_KUBECTL", default_value = "kubectl")]
    pub kubectl: PathBuf,

    #[arg(long, env = "KDEPLOY_INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// Annotate the namespace with deployment details
    #[arg(long, env = "KDEPLOY_ANNOTATE_NAMESPACE", default_value_t = true, action = clap::ArgAction::Set)]
    pub annotate_namespace: bool,

    /// Extra key=value annotations, one per line
    #[arg(long, env = "KDEPLOY_ANNOTATIONS", default_value = "")]
    pub annotations: String,
}

/// Validated configuration for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DeployConfig {
    pub action: Action,
    pub strategy: DeploymentStrategy,
    pub route_method: RouteStrategy,
    pub traffic_split_method: TrafficSplitMethod,
    pub percentage: Option<i32>,
    pub baseline_and_canary_replicas: Option<i32>,
    pub version_switch_buffer: Duration,
    pub manifests: Vec<String>,
    pub images: Vec<String>,
    pub image_pull_secrets: Vec<String>,
    pub namespace: String,
    pub force: bool,
    pub kubectl_path: PathBuf,
    pub insecure_skip_tls_verify: bool,
    pub annotate_namespace: bool,
    pub annotations: BTreeMap<String, String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            action: Action::Deploy,
            strategy: DeploymentStrategy::Basic,
            route_method: RouteStrategy::Service,
            traffic_split_method: TrafficSplitMethod::Pod,
            percentage: None,
            baseline_and_canary_replicas: None,
            version_switch_buffer: Duration::ZERO,
            manifests: Vec::new(),
            images: Vec::new(),
            image_pull_secrets: Vec::new(),
            namespace: "default".to_string(),
            force: false,
            kubectl_path: PathBuf::from("kubectl"),
            insecure_skip_tls_verify: false,
            annotate_namespace: true,
            annotations: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Validate raw arguments
    ///
    /// # Validation Rules
    /// - enum-valued options parse case-insensitively
    /// - `percentage` is 0-100 and required for canary deploy and promote
    /// - `baseline-and-canary-replicas` is 0-100
    /// - `version-switch-buffer` is 0-300 seconds
    /// - at least one manifest source remains after splitting
    pub fn from_args(args: ConfigArgs) -> Result<Self, ConfigError> {
        let action: Action = args.action.parse()?;
        let strategy: DeploymentStrategy = args.strategy.parse()?;
        let route_method: RouteStrategy = args.route_method.parse()?;
        let traffic_split_method: TrafficSplitMethod = args.traffic_split_method.parse()?;

        let percentage = args.percentage.map(validate_percentage).transpose()?;
        if strategy == DeploymentStrategy::Canary
            && matches!(action, Action::Deploy | Action::Promote)
            && percentage.is_none()
        {
            return Err(ConfigError::MissingPercentage(action));
        }

        let baseline_and_canary_replicas = args
            .baseline_and_canary_replicas
            .map(validate_replicas)
            .transpose()?;
        let version_switch_buffer = validate_version_switch_buffer(args.version_switch_buffer)?;

        let manifests = parse_manifest_paths(&args.manifests);
        if manifests.is_empty() {
            return Err(ConfigError::NoManifests);
        }

        Ok(Self {
            action,
            strategy,
            route_method,
            traffic_split_method,
            percentage,
            baseline_and_canary_replicas,
            version_switch_buffer,
            manifests,
            images: split_list(&args.images),
            image_pull_secrets: split_list(&args.imagepullsecrets),
            namespace: args.namespace,
            force: args.force,
            kubectl_path: args.kubectl,
            insecure_skip_tls_verify: args.insecure_skip_tls_verify,
            annotate_namespace: args.annotate_namespace,
            annotations: parse_annotations(&args.annotations)?,
        })
    }

    /// Canary percentage, required wherever weights or replicas are computed
    pub fn canary_percentage(&self) -> Result<i32, ConfigError> {
        self.percentage
            .ok_or(ConfigError::MissingPercentage(self.action))
    }
}

/// Validate a canary percentage
pub fn validate_percentage(value: i64) -> Result<i32, ConfigError> {
    if (0..=100).contains(&value) {
        Ok(value as i32)
    } else {
        Err(ConfigError::PercentageOutOfRange(value))
    }
}

/// Validate the baseline-and-canary replica override
pub fn validate_replicas(value: i64) -> Result<i32, ConfigError> {
    if (0..=100).contains(&value) {
        Ok(value as i32)
    } else {
        Err(ConfigError::ReplicasOutOfRange(value))
    }
}

/// Validate the version-switch buffer
pub fn validate_version_switch_buffer(seconds: i64) -> Result<Duration, ConfigError> {
    if (0..=MAX_VERSION_SWITCH_BUFFER_SECS).contains(&seconds) {
        Ok(Duration::from_secs(seconds as u64))
    } else {
        Err(ConfigError::BufferOutOfRange(seconds))
    }
}

/// Split the manifests input on newlines, commas and semicolons
pub fn parse_manifest_paths(input: &str) -> Vec<String> {
    input
        .split(['\n', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(['\n', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_annotations(input: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidAnnotation(line.to_string())),
        })
        .collect()
}
