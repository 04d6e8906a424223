//! In-memory cluster standing in for kubectl in tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecResult, KubectlError, KubectlGateway};
use crate::manifest::ResourceIdentifier;

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<(String, String), Value>,
    calls: Vec<String>,
    api_versions: Vec<String>,
    failing_rollouts: HashSet<(String, String)>,
    fail_applies: bool,
}

/// Applied objects keyed by lower-case kind and name, plus a call log
pub struct FakeKubectl {
    state: Mutex<FakeState>,
}

fn key(kind: &str, name: &str) -> (String, String) {
    (kind.to_ascii_lowercase(), name.to_string())
}

fn value_key(value: &Value) -> (String, String) {
    key(
        value["kind"].as_str().unwrap_or_default(),
        value["metadata"]["name"].as_str().unwrap_or_default(),
    )
}

impl Default for FakeKubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKubectl {
    pub fn new() -> Self {
        Self::with_api_versions(&["apps/v1", "v1", "split.smi-spec.io/v1alpha3"])
    }

    pub fn with_api_versions(versions: &[&str]) -> Self {
        Self {
            state: Mutex::new(FakeState {
                api_versions: versions.iter().map(|v| v.to_string()).collect(),
                ..FakeState::default()
            }),
        }
    }

    /// Seed an object as if it already existed in the cluster
    pub fn insert(&self, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(value_key(&value), value);
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(&key(kind, name)).cloned()
    }

    pub fn exists(&self, kind: &str, name: &str) -> bool {
        self.object(kind, name).is_some()
    }

    /// Names of all stored objects of a kind, sorted
    pub fn names(&self, kind: &str) -> Vec<String> {
        let kind = kind.to_ascii_lowercase();
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn set_status(&self, kind: &str, name: &str, status: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(object) = state.objects.get_mut(&key(kind, name)) {
            object["status"] = status;
        }
    }

    pub fn fail_rollout(&self, kind: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_rollouts
            .insert(key(kind, name));
    }

    pub fn fail_applies(&self) {
        self.state.lock().unwrap().fail_applies = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose verb matches, e.g. `"apply"` or `"delete"`
    pub fn calls_to(&self, verb: &str) -> Vec<String> {
        let prefix = format!("{verb} ");
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix) || c == verb)
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl KubectlGateway for FakeKubectl {
    async fn apply(&self, files: &[PathBuf], _force: bool) -> Result<ExecResult, KubectlError> {
        let mut applied = Vec::new();
        for file in files {
            let content = std::fs::read_to_string(file).expect("applied file is readable");
            let value: Value = serde_json::from_str(&content).expect("applied file is JSON");
            applied.push(value);
        }

        let mut state = self.state.lock().unwrap();
        for value in &applied {
            let (kind, name) = value_key(value);
            state.calls.push(format!("apply {kind}/{name}"));
        }
        if state.fail_applies {
            return Ok(ExecResult::failure(1, "error: apply rejected"));
        }
        for mut value in applied {
            let key = value_key(&value);
            if let Some(status) = state.objects.get(&key).and_then(|o| o.get("status")) {
                value["status"] = status.clone();
            }
            state.objects.insert(key, value);
        }
        Ok(ExecResult::success("configured"))
    }

    async fn delete(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let (kind, name) = key(&target.kind, &target.name);
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {kind}/{name}"));
        match state.objects.remove(&(kind.clone(), name.clone())) {
            Some(_) => Ok(ExecResult::success(format!("{kind} \"{name}\" deleted"))),
            None => Ok(ExecResult::failure(
                1,
                format!("Error from server (NotFound): {kind} \"{name}\" not found"),
            )),
        }
    }

    async fn get(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let (kind, name) = key(&target.kind, &target.name);
        self.record(format!("get {kind}/{name}"));
        match self.object(&kind, &name) {
            Some(object) => Ok(ExecResult::success(object.to_string())),
            None => Ok(ExecResult::failure(
                1,
                format!("Error from server (NotFound): {kind} \"{name}\" not found"),
            )),
        }
    }

    async fn describe(&self, target: &ResourceIdentifier) -> Result<ExecResult, KubectlError> {
        let (kind, name) = key(&target.kind, &target.name);
        self.record(format!("describe {kind}/{name}"));
        Ok(ExecResult::success(format!("Name: {name}")))
    }

    async fn rollout_status(
        &self,
        target: &ResourceIdentifier,
    ) -> Result<ExecResult, KubectlError> {
        let key = key(&target.kind, &target.name);
        self.record(format!("rollout-status {}/{}", key.0, key.1));
        if self.state.lock().unwrap().failing_rollouts.contains(&key) {
            return Ok(ExecResult::failure(1, "error: deployment exceeded its progress deadline"));
        }
        Ok(ExecResult::success("successfully rolled out"))
    }

    async fn annotate(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError> {
        let (kind, name) = key(&target.kind, &target.name);
        self.record(format!("annotate {kind}/{name} {key_value}"));
        Ok(ExecResult::success("annotated"))
    }

    async fn label(
        &self,
        target: &ResourceIdentifier,
        key_value: &str,
    ) -> Result<ExecResult, KubectlError> {
        let (kind, name) = key(&target.kind, &target.name);
        self.record(format!("label {kind}/{name} {key_value}"));
        Ok(ExecResult::success("labeled"))
    }

    async fn api_versions(&self) -> Result<ExecResult, KubectlError> {
        self.record("api-versions".to_string());
        let versions = self.state.lock().unwrap().api_versions.join("\n");
        Ok(ExecResult::success(versions))
    }
}
