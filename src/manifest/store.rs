//! Manifest store: reads manifest sources and writes derived objects to temp files
//!
//! Sources are local files, directories (walked recursively for `.yml` and
//! `.yaml` files) or `https://` URLs. Derived objects handed to kubectl are
//! written as JSON into a per-invocation temp directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use super::object::{parse_documents, ManifestObject, RawManifest};
use super::ManifestError;

/// Errors from reading or writing manifests
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Manifest source {0} does not exist")]
    NotFound(String),

    #[error("Invalid manifest from {url}: {source}")]
    InvalidRemote {
        url: String,
        #[source]
        source: ManifestError,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Reads manifest sources and owns the temp directory for derived objects
pub struct ManifestStore {
    temp_dir: PathBuf,
    http: reqwest::Client,
    counter: AtomicUsize,
}

impl ManifestStore {
    /// Create a store writing into `temp_dir`, creating it if needed
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir).map_err(|source| StoreError::Write {
            path: temp_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            temp_dir,
            http: reqwest::Client::new(),
            counter: AtomicUsize::new(0),
        })
    }

    /// Create a store in a fresh directory under the system temp dir
    pub fn in_system_temp() -> Result<Self, StoreError> {
        let dir = std::env::temp_dir().join(format!("kdeploy-{}", uuid::Uuid::new_v4()));
        Self::new(dir)
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Read every source, in order, without duplicates
    ///
    /// Remote sources must parse into valid manifest objects before they are
    /// accepted.
    pub async fn read_all(&self, sources: &[String]) -> Result<Vec<RawManifest>, StoreError> {
        let mut seen = HashSet::new();
        let mut manifests = Vec::new();

        for source in sources {
            let source = source.trim();
            if source.is_empty() {
                continue;
            }
            if source.starts_with("https://") || source.starts_with("http://") {
                if seen.insert(source.to_string()) {
                    manifests.push(self.fetch_remote(source).await?);
                }
                continue;
            }

            for path in collect_manifest_files(Path::new(source))? {
                let key = path.display().to_string();
                if !seen.insert(key.clone()) {
                    continue;
                }
                let content = tokio::fs::read_to_string(&path).await.map_err(|source| {
                    StoreError::Read {
                        path: key.clone(),
                        source,
                    }
                })?;
                debug!(path = %key, "Read manifest file");
                manifests.push(RawManifest {
                    origin: key,
                    content,
                });
            }
        }

        Ok(manifests)
    }

    async fn fetch_remote(&self, url: &str) -> Result<RawManifest, StoreError> {
        info!(url = %url, "Fetching remote manifest");
        let fetch_err = |e: reqwest::Error| StoreError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(fetch_err)?
            .error_for_status()
            .map_err(fetch_err)?;
        let content = response.text().await.map_err(fetch_err)?;

        parse_documents(url, &content).map_err(|source| StoreError::InvalidRemote {
            url: url.to_string(),
            source,
        })?;

        Ok(RawManifest {
            origin: url.to_string(),
            content,
        })
    }

    /// Write objects as JSON files and return their paths, in input order
    ///
    /// File names embed kind, name and a timestamp so a run's derived
    /// objects can be told apart in the temp directory.
    pub fn write_temp(&self, objects: &[ManifestObject]) -> Result<Vec<PathBuf>, StoreError> {
        let millis = Utc::now().timestamp_millis();
        objects
            .iter()
            .map(|object| {
                let index = self.counter.fetch_add(1, Ordering::Relaxed);
                let file_name = format!(
                    "{}_{}_{}_{}.json",
                    object.kind_name(),
                    object.name(),
                    millis,
                    index
                );
                let path = self.temp_dir.join(file_name);
                let json = object.to_json()?;
                std::fs::write(&path, json).map_err(|source| StoreError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
                Ok(path)
            })
            .collect()
    }
}

/// Expand a local source into the manifest files it names
fn collect_manifest_files(path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| StoreError::NotFound(path.display().to_string()))?;
    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(|source| StoreError::Read {
            path: path.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            files.extend(collect_manifest_files(&entry)?);
        } else if is_yaml_file(&entry) {
            files.push(entry);
        } else {
            debug!(path = %entry.display(), "Skipping non-YAML file");
        }
    }
    Ok(files)
}

fn is_yaml_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}
