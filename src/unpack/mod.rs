// src/unpack/mod.rs

//! Package content unpacking
//!
//! An [`Unpacker`] turns a package reference into what the reconcilers need
//! to know about the content behind it: its digest, the packages it depends
//! on, and the resources it provides. Two implementations ship with crank:
//!
//! - [`DirectoryUnpacker`] serves packages from a local directory tree laid
//!   out like a registry (`<root>/<registry>/<name>/<tag>/`)
//! - [`StaticUnpacker`] serves packages registered in memory
//!
//! # Package layout
//!
//! ```text
//! <package>/
//!   .registry/app.yaml      # dependsOn: [{ package: registry/other:v1 }]
//!   crds/bucket.yaml        # kind: CustomResourceDefinition
//!   compositions/db.yaml    # kind: Composition
//! ```

mod directory;
mod memory;

pub use directory::DirectoryUnpacker;
pub use memory::StaticUnpacker;

use crate::model::Manifest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Path of the metadata file inside a package
pub const METADATA_PATH: &str = ".registry/app.yaml";

/// Errors from fetching or parsing package content
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnpackError {
    /// Reference does not name any known content
    #[error("cannot resolve {reference}: {reason}")]
    UnresolvableReference { reference: String, reason: String },

    /// Content source could not be reached or read
    #[error("registry unavailable for {reference}: {reason}")]
    RegistryUnavailable { reference: String, reason: String },

    /// Content was found but its metadata or manifests are invalid
    #[error("malformed metadata in {reference}: {reason}")]
    MalformedMetadata { reference: String, reason: String },
}

/// Identity and dependencies of resolved content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Content digest; becomes the revision name
    pub digest: String,
    /// Declared dependency references
    pub dependencies: Vec<String>,
}

/// Resolves package references to content
#[async_trait]
pub trait Unpacker: Send + Sync {
    /// Digest and declared dependencies of the referenced content
    async fn resolve(&self, reference: &str) -> Result<Resolution, UnpackError>;

    /// Resources the referenced content provides
    async fn list_resources(&self, reference: &str) -> Result<Vec<Manifest>, UnpackError>;
}

/// One declared dependency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package reference, e.g. `registry/provider-aws:v1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Name of a resource definition owned by some package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crd: Option<String>,
}

/// Contents of [`METADATA_PATH`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
}

impl PackageMetadata {
    /// Parse package metadata
    pub fn parse(reference: &str, text: &str) -> Result<Self, UnpackError> {
        // An empty file means "no dependencies"
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| UnpackError::MalformedMetadata {
            reference: reference.to_string(),
            reason: format!("{}: {}", METADATA_PATH, e),
        })
    }

    /// Package references this content depends on
    ///
    /// Resource-definition dependencies cannot be resolved to a package yet
    /// and are skipped.
    pub fn package_dependencies(&self) -> Vec<String> {
        self.depends_on
            .iter()
            .filter_map(|d| match (&d.package, &d.crd) {
                (Some(package), _) => Some(package.clone()),
                (None, Some(crd)) => {
                    debug!(%crd, "skipping resource definition dependency");
                    None
                }
                (None, None) => None,
            })
            .collect()
    }
}
