//! `KubectlGateway` backed by the kubectl binary

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ExecResult, KubectlError, KubectlGateway};
use crate::manifest::ResourceIdentifier;

/// Runs kubectl as a child process
#[derive(Debug, Clone)]
pub struct Kubectl {
    kubectl_path: PathBuf,
    namespace: String,
    insecure_skip_tls_verify: bool,
}

impl Kubectl {
    pub fn new(
        kubectl_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        insecure_skip_tls_verify: bool,
    ) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            namespace: namespace.into(),
            insecure_skip_tls_verify,
        }
    }

    /// Trailing flags appended to every command
    fn common_args(&self, namespace: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--namespace".to_string(),
            namespace.unwrap_or(&self.namespace).to_string(),
        ];
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify".to_string());
        }
        args
    }

    /// Full argument list for a command, common flags included
    pub fn command_args(&self, mut args: Vec<String>, namespace: Option<&str>) -> Vec<String> {
        args.extend(self.common_args(namespace));
        args
    }

    async fn execute(
        &self,
        args: Vec<String>,
        namespace: Option<&str>,
    ) -> Result<ExecResult, KubectlError> {
        let args = self.command_args(args, namespace);
        let command = args.join(" ");
        debug!(kubectl = %self.kubectl_path.display(), args = %command, "Running kubectl");

        let output = Command::new(&self.kubectl_path)
            .args(&args)
            .output()
            .await
            .map_err(|source| KubectlError::Spawn {
                command: command.clone(),
                source,
            })?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn join_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn resource_arg(target: &ResourceIdentifier) -> String {
    format!("{}/{}", target.kind, target.name)
}

#[async_trait]
impl KubectlGateway for Kubectl {
    async fn apply(&self, files: &[PathBuf], force: bool) -> Result<ExecResult, KubectlError> {
        let mut args = vec!["apply".to_string(), "-f".to_string(), join_paths(files)];
        if force {
            args.push("--force".to_string());
        }
        self.execute(args, None).await
    }

    async fn delete(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "delete".to_string(),
            target.kind.clone(),
            target.name.clone(),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn get(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "get".to_string(),
            resource_arg(target),
            "-o".to_string(),
            "json".to_string(),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn describe(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "describe".to_string(),
            target.kind.clone(),
            target.name.clone(),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn rollout_status(
        &self,
        target: &ResourceIdentifier,
    ) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "rollout".to_string(),
            "status".to_string(),
            resource_arg(target),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn annotate(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "annotate".to_string(),
            target.kind.clone(),
            target.name.clone(),
            key_value.to_string(),
            "--overwrite".to_string(),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn label(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError> {
        let args = vec![
            "label".to_string(),
            target.kind.clone(),
            target.name.clone(),
            key_value.to_string(),
            "--overwrite".to_string(),
        ];
        self.execute(args, target.namespace.as_deref()).await
    }

    async fn api_versions(&self) -> Result<ExecResult, KubectlError> {
        self.execute(vec!["api-versions".to_string()], None).await
    }
}
