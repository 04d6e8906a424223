//! kdeploy: deploy, promote and reject Kubernetes manifests with basic,
//! canary or blue-green strategies, driving the cluster through kubectl.

pub mod controller;
pub mod kubectl;
pub mod manifest;
