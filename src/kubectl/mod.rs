//! Kubectl gateway: the only path from the engine to the cluster
//!
//! Every call returns the exit code with captured stdout and stderr. The
//! engine decides per call site whether a non-zero exit is fatal.

#[cfg(test)]
pub mod fake;
pub mod process;

pub use process::Kubectl;

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::manifest::transform::strip_cluster_details;
use crate::manifest::ResourceIdentifier;

/// Errors from running kubectl
#[derive(Debug, Error)]
pub enum KubectlError {
    #[error("Failed to run kubectl {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kubectl {command} failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to parse kubectl {command} output: {message}")]
    InvalidOutput { command: String, message: String },
}

/// Outcome of one kubectl invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `KubectlError::CommandFailed`
    pub fn check(self, command: &str) -> Result<Self, KubectlError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(KubectlError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Cluster operations the engine needs
///
/// A target without a namespace falls back to the gateway's configured
/// namespace.
#[async_trait]
pub trait KubectlGateway: Send + Sync {
    /// `kubectl apply -f a,b[,...] [--force]`
    async fn apply(&self, files: &[PathBuf], force: bool) -> Result<ExecResult, KubectlError>;

    async fn delete(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError>;

    /// `kubectl get kind/name -o json`
    async fn get(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError>;

    async fn describe(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError>;

    async fn rollout_status(&self, target: &ResourceIdentifier)
        -> Result<ExecResult, KubectlError>;

    async fn annotate(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError>;

    async fn label(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError>;

    async fn api_versions(&self) -> Result<ExecResult, KubectlError>;
}

/// Fetch an object as JSON, stripped of cluster-assigned fields
///
/// Returns `None` when kubectl reports an error, which for `get` almost
/// always means the object does not exist.
pub async fn fetch_resource(
    kubectl: &dyn KubectlGateway,
    target: &ResourceIdentifier,
) -> Result<Option<Value>, KubectlError> {
    let mut resource = match fetch_raw_resource(kubectl, target).await? {
        Some(resource) => resource,
        None => return Ok(None),
    };
    strip_cluster_details(&mut resource);
    Ok(Some(resource))
}

/// Fetch an object as JSON, status included
pub async fn fetch_raw_resource(
    kubectl: &dyn KubectlGateway,
    target: &ResourceIdentifier,
) -> Result<Option<Value>, KubectlError> {
    let result = kubectl.get(target).await?;
    if !result.is_success() || !result.stderr.trim().is_empty() {
        debug!(
            resource = %target,
            exit_code = result.exit_code,
            stderr = %result.stderr.trim(),
            "Resource not found"
        );
        return Ok(None);
    }
    serde_json::from_str(&result.stdout)
        .map(Some)
        .map_err(|e| KubectlError::InvalidOutput {
            command: format!("get {target}"),
            message: e.to_string(),
        })
}

/// Best-effort `describe`, logged for diagnostics and never propagated
pub async fn describe_for_diagnostics(kubectl: &dyn KubectlGateway, target: &ResourceIdentifier) {
    match kubectl.describe(target).await {
        Ok(result) if result.is_success() => {
            tracing::info!(resource = %target, "{}", result.stdout.trim_end());
        }
        Ok(result) => {
            debug!(resource = %target, stderr = %result.stderr.trim(), "describe failed");
        }
        Err(e) => {
            debug!(resource = %target, error = %e, "describe failed");
        }
    }
}
