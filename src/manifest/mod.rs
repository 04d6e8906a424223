//! Manifest model: parsing, label surgery and the temp-file store

pub mod labels;
pub mod object;
pub mod store;
pub mod transform;

pub use object::{
    parse_documents, parse_manifests, ManifestObject, RawManifest, ResourceIdentifier,
    ResourceKind, RolloutResource,
};
pub use store::{ManifestStore, StoreError};

use thiserror::Error;

/// Errors raised while parsing or rewriting manifests
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to parse YAML in {origin}: {message}")]
    Yaml { origin: String, message: String },

    #[error("Manifest document in {origin} is missing required field '{field}'")]
    MissingField { origin: String, field: &'static str },

    #[error("Manifest document in {0} is not a mapping")]
    NotAMapping(String),

    #[error("Invalid manifest object in {origin}: {message}")]
    Invalid { origin: String, message: String },

    #[error("Failed to serialize manifest object: {0}")]
    Serialization(String),
}
