use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::controller::rollout::Context;
use crate::kubectl::{fetch_resource, KubectlError};
use crate::manifest::labels::{
    suffixed_name, ColorLabel, BASELINE_SUFFIX, CANARY_SUFFIX, GREEN_SUFFIX, STABLE_SUFFIX,
};
use crate::manifest::{ManifestObject, ResourceIdentifier};

pub const TRAFFIC_SPLIT_KIND: &str = "TrafficSplit";
pub const TRAFFIC_SPLIT_API_PREFIX: &str = "split.smi-spec.io";
pub const TRAFFIC_SPLIT_NAME_SUFFIX: &str = "-trafficsplit";

/// Full weight; every split sums to this
pub const MAX_WEIGHT: i32 = 1000;
pub const MIN_WEIGHT: i32 = 0;

/// Errors from the traffic split controller
#[derive(Debug, Error)]
pub enum TrafficSplitError {
    #[error("Unable to find traffic split api version ({TRAFFIC_SPLIT_API_PREFIX}) in cluster")]
    ApiVersionNotFound,

    #[error("Malformed TrafficSplit {name}: {message}")]
    Malformed { name: String, message: String },

    #[error("Invalid traffic split weights for {service}: {message}")]
    InvalidWeights { service: String, message: String },

    #[error(transparent)]
    Kubectl(#[from] KubectlError),
}

/// Name of the TrafficSplit object for a service
pub fn traffic_split_name(service: &str) -> String {
    suffixed_name(service, TRAFFIC_SPLIT_NAME_SUFFIX)
}

/// One weighted backend of a TrafficSplit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficSplitBackend {
    pub service: String,
    pub weight: i32,
}

/// Normalise a backend weight read from the cluster to an integer
///
/// Weights come back as integers or as quantity strings: `"500"`, `"1k"`,
/// or `"1000m"` where the `m` is appended to the raw weight.
pub fn parse_weight(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|w| i32::try_from(w).ok()),
        Value::String(s) => parse_quantity_weight(s.trim()),
        _ => None,
    }
}

fn parse_quantity_weight(quantity: &str) -> Option<i32> {
    let (number, scale) = match quantity.strip_suffix('k') {
        Some(number) => (number, 1000.0),
        None => (quantity.strip_suffix('m').unwrap_or(quantity), 1.0),
    };
    let weight = number.parse::<f64>().ok()? * scale;
    let rounded = weight.round();
    let integral = weight.is_finite() && (weight - rounded).abs() < 1e-6;
    (integral && (0.0..=f64::from(i32::MAX)).contains(&rounded)).then_some(rounded as i32)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TrafficSplitSpec {
    service: String,
    backends: Vec<TrafficSplitBackend>,
}

/// Spec as read back from the cluster, weights not yet normalised
#[derive(Debug, Deserialize)]
struct ClusterTrafficSplitSpec {
    service: String,
    #[serde(default)]
    backends: Vec<ClusterBackend>,
}

#[derive(Debug, Deserialize)]
struct ClusterBackend {
    service: String,
    #[serde(default)]
    weight: Value,
}

/// Stable, baseline and canary weights of a canary split
///
/// Baseline and canary carry the same weight; the three sum to 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanaryWeights {
    pub stable: i32,
    pub baseline: i32,
    pub canary: i32,
}

impl CanaryWeights {
    /// Split `percentage` of the traffic evenly between baseline and canary
    ///
    /// # Arguments
    /// * `percentage` - Share of traffic (0-100) leaving stable
    ///
    /// # Returns
    /// Weights with `stable = 1000 - percentage * 10` and
    /// `baseline = canary = percentage * 5`
    pub fn from_percentage(percentage: i32) -> Self {
        let non_stable = percentage.clamp(0, 100) * 10;
        Self {
            stable: MAX_WEIGHT - non_stable,
            baseline: non_stable / 2,
            canary: non_stable / 2,
        }
    }

    pub fn all_stable() -> Self {
        Self {
            stable: MAX_WEIGHT,
            baseline: MIN_WEIGHT,
            canary: MIN_WEIGHT,
        }
    }

    /// Full swing to the canary, used while promoting
    pub fn all_canary() -> Self {
        Self {
            stable: MIN_WEIGHT,
            baseline: MIN_WEIGHT,
            canary: MAX_WEIGHT,
        }
    }

    pub fn total(&self) -> i32 {
        self.stable + self.baseline + self.canary
    }
}

/// In-memory TrafficSplit: the service and its weighted backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSplit {
    pub name: String,
    pub service: String,
    pub backends: Vec<TrafficSplitBackend>,
}

impl TrafficSplit {
    /// Two-backend split for blue-green routing
    ///
    /// All weight goes to `<service>-green` when `next_color` is green,
    /// otherwise to `<service>-stable`.
    pub fn blue_green(service: &str, next_color: ColorLabel) -> Self {
        let (stable, green) = match next_color {
            ColorLabel::Green => (MIN_WEIGHT, MAX_WEIGHT),
            ColorLabel::None => (MAX_WEIGHT, MIN_WEIGHT),
        };
        Self {
            name: traffic_split_name(service),
            service: service.to_string(),
            backends: vec![
                TrafficSplitBackend {
                    service: suffixed_name(service, STABLE_SUFFIX),
                    weight: stable,
                },
                TrafficSplitBackend {
                    service: suffixed_name(service, GREEN_SUFFIX),
                    weight: green,
                },
            ],
        }
    }

    /// Three-backend split for SMI canaries
    pub fn canary(service: &str, weights: CanaryWeights) -> Result<Self, TrafficSplitError> {
        if weights.baseline != weights.canary && weights != CanaryWeights::all_canary() {
            return Err(TrafficSplitError::InvalidWeights {
                service: service.to_string(),
                message: format!(
                    "baseline ({}) and canary ({}) must be equal",
                    weights.baseline, weights.canary
                ),
            });
        }
        if weights.total() != MAX_WEIGHT {
            return Err(TrafficSplitError::InvalidWeights {
                service: service.to_string(),
                message: format!("weights sum to {}, expected {MAX_WEIGHT}", weights.total()),
            });
        }
        Ok(Self {
            name: traffic_split_name(service),
            service: service.to_string(),
            backends: vec![
                TrafficSplitBackend {
                    service: suffixed_name(service, STABLE_SUFFIX),
                    weight: weights.stable,
                },
                TrafficSplitBackend {
                    service: suffixed_name(service, BASELINE_SUFFIX),
                    weight: weights.baseline,
                },
                TrafficSplitBackend {
                    service: suffixed_name(service, CANARY_SUFFIX),
                    weight: weights.canary,
                },
            ],
        })
    }

    pub fn total_weight(&self) -> i32 {
        self.backends.iter().map(|b| b.weight).sum()
    }

    /// Weight of a backend service, if present
    pub fn weight_of(&self, backend_service: &str) -> Option<i32> {
        self.backends
            .iter()
            .find(|b| b.service == backend_service)
            .map(|b| b.weight)
    }

    /// Parse a TrafficSplit read from the cluster
    ///
    /// Backends whose weight cannot be read are left out, so they count as
    /// missing wherever a weight is compared.
    pub fn from_value(value: &Value) -> Result<Self, TrafficSplitError> {
        let name = value["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let spec: ClusterTrafficSplitSpec =
            serde_json::from_value(value["spec"].clone()).map_err(|e| {
                TrafficSplitError::Malformed {
                    name: name.clone(),
                    message: e.to_string(),
                }
            })?;

        let mut backends = Vec::with_capacity(spec.backends.len());
        for backend in spec.backends {
            match parse_weight(&backend.weight) {
                Some(weight) => backends.push(TrafficSplitBackend {
                    service: backend.service,
                    weight,
                }),
                None => warn!(
                    traffic_split = %name,
                    backend = %backend.service,
                    weight = %backend.weight,
                    "Ignoring backend with unreadable weight"
                ),
            }
        }
        Ok(Self {
            name,
            service: spec.service,
            backends,
        })
    }

    /// Render as a manifest object
    ///
    /// # Arguments
    /// * `api_version` - Discovered `split.smi-spec.io/<version>`
    /// * `annotations` - User annotations written into the object metadata
    pub fn to_manifest(
        &self,
        api_version: &str,
        annotations: &BTreeMap<String, String>,
    ) -> ManifestObject {
        let metadata = ObjectMeta {
            name: Some(self.name.clone()),
            annotations: (!annotations.is_empty()).then(|| annotations.clone()),
            ..ObjectMeta::default()
        };
        let spec = TrafficSplitSpec {
            service: self.service.clone(),
            backends: self.backends.clone(),
        };
        ManifestObject::new(
            api_version,
            TRAFFIC_SPLIT_KIND,
            metadata,
            json!({ "spec": spec }),
        )
    }
}

/// Pick the first `split.smi-spec.io` version from `kubectl api-versions` output
pub fn find_traffic_split_api_version(api_versions: &str) -> Option<String> {
    api_versions
        .lines()
        .map(str::trim)
        .find(|version| version.starts_with(TRAFFIC_SPLIT_API_PREFIX))
        .map(str::to_string)
}

/// TrafficSplit api version, discovered once and cached on the context
pub async fn traffic_split_api_version(ctx: &Context) -> Result<String, TrafficSplitError> {
    let version = ctx
        .traffic_split_api_version_cache()
        .get_or_try_init(|| async {
            let result = ctx.kubectl.api_versions().await?.check("api-versions")?;
            let version = find_traffic_split_api_version(&result.stdout)
                .ok_or(TrafficSplitError::ApiVersionNotFound)?;
            info!(api_version = %version, "Discovered traffic split api version");
            Ok::<_, TrafficSplitError>(version)
        })
        .await?;
    Ok(version.clone())
}

/// Build the manifest for a split, resolving the api version and annotations
pub async fn traffic_split_manifest(
    ctx: &Context,
    split: &TrafficSplit,
) -> Result<ManifestObject, TrafficSplitError> {
    let api_version = traffic_split_api_version(ctx).await?;
    debug!(
        traffic_split = %split.name,
        backends = ?split.backends,
        "Rendering traffic split"
    );
    Ok(split.to_manifest(&api_version, &ctx.config.annotations))
}

/// Fetch the TrafficSplit of a service from the cluster
pub async fn fetch_traffic_split(
    ctx: &Context,
    service: &str,
) -> Result<Option<TrafficSplit>, TrafficSplitError> {
    let target = ResourceIdentifier::new(TRAFFIC_SPLIT_KIND, traffic_split_name(service))
        .in_namespace(Some(ctx.config.namespace.clone()));
    match fetch_resource(ctx.kubectl.as_ref(), &target).await? {
        Some(value) => TrafficSplit::from_value(&value).map(Some),
        None => Ok(None),
    }
}

/// Services whose blue-green split is not fully on green
///
/// A service is offending when its split or either backend is missing, or
/// when green does not carry the full weight.
pub async fn validate_traffic_split_state(
    ctx: &Context,
    services: &[ManifestObject],
) -> Result<Vec<String>, TrafficSplitError> {
    let mut offending = Vec::new();
    for service in services {
        let name = service.name();
        let Some(split) = fetch_traffic_split(ctx, name).await? else {
            debug!(service = %name, "No traffic split exists");
            offending.push(traffic_split_name(name));
            continue;
        };

        let green_ok = split
            .weight_of(&suffixed_name(name, GREEN_SUFFIX))
            .is_some_and(|w| w == MAX_WEIGHT);
        let stable_ok = split
            .weight_of(&suffixed_name(name, STABLE_SUFFIX))
            .is_some_and(|w| w == MIN_WEIGHT);
        if !(green_ok && stable_ok) {
            debug!(traffic_split = %split.name, backends = ?split.backends, "Traffic split not routed to green");
            offending.push(split.name);
        }
    }
    Ok(offending)
}
