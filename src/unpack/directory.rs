// src/unpack/directory.rs

//! Directory-backed registry
//!
//! Treats a local directory tree as a registry. Reference
//! `registry/name:tag` lives at `<root>/registry/name/<tag>/`, untagged
//! references at `.../latest/`. Everything under a package directory feeds
//! the digest; every YAML file outside `.registry/` is read as manifests.

use super::{METADATA_PATH, PackageMetadata, Resolution, UnpackError, Unpacker};
use crate::hash::TreeHasher;
use crate::model::{Manifest, ManifestKind};
use crate::reference::PackageReference;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Unpacker reading packages from a directory tree
#[derive(Debug, Clone)]
pub struct DirectoryUnpacker {
    root: PathBuf,
}

impl DirectoryUnpacker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the content for `reference`
    pub fn package_dir(&self, reference: &str) -> Result<PathBuf, UnpackError> {
        let parsed = PackageReference::new(reference);
        let relative = Path::new(parsed.canonical_name()).join(parsed.tag_or_default());

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if parsed.canonical_name().is_empty() || escapes {
            return Err(UnpackError::UnresolvableReference {
                reference: reference.to_string(),
                reason: "reference is not a relative registry path".to_string(),
            });
        }

        Ok(self.root.join(relative))
    }

    fn open(&self, reference: &str) -> Result<PackageDir, UnpackError> {
        if !self.root.is_dir() {
            return Err(UnpackError::RegistryUnavailable {
                reference: reference.to_string(),
                reason: format!("registry root {} is not a directory", self.root.display()),
            });
        }
        let dir = self.package_dir(reference)?;
        if !dir.is_dir() {
            return Err(UnpackError::UnresolvableReference {
                reference: reference.to_string(),
                reason: format!("{} does not exist", dir.display()),
            });
        }
        PackageDir::scan(reference, dir)
    }
}

#[async_trait]
impl Unpacker for DirectoryUnpacker {
    async fn resolve(&self, reference: &str) -> Result<Resolution, UnpackError> {
        let this = self.clone();
        let reference = reference.to_string();
        let task_ref = reference.clone();
        let resolution = tokio::task::spawn_blocking(move || {
            let package = this.open(&task_ref)?;
            package.resolution()
        })
        .await
        .map_err(|e| unavailable(&reference, e))??;

        debug!(%reference, digest = %resolution.digest, deps = resolution.dependencies.len(), "resolved package");
        Ok(resolution)
    }

    async fn list_resources(&self, reference: &str) -> Result<Vec<Manifest>, UnpackError> {
        let this = self.clone();
        let reference = reference.to_string();
        let task_ref = reference.clone();
        let manifests = tokio::task::spawn_blocking(move || {
            let package = this.open(&task_ref)?;
            package.manifests()
        })
        .await
        .map_err(|e| unavailable(&reference, e))??;

        debug!(%reference, count = manifests.len(), "listed package resources");
        Ok(manifests)
    }
}

fn unavailable(reference: &str, e: impl std::fmt::Display) -> UnpackError {
    UnpackError::RegistryUnavailable {
        reference: reference.to_string(),
        reason: e.to_string(),
    }
}

/// Files of one package, keyed by '/'-separated relative path
struct PackageDir {
    reference: String,
    root: PathBuf,
    files: Vec<String>,
}

impl PackageDir {
    fn scan(reference: &str, root: PathBuf) -> Result<Self, UnpackError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| unavailable(reference, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| unavailable(reference, e))?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
        files.sort();

        Ok(Self {
            reference: reference.to_string(),
            root,
            files,
        })
    }

    fn read(&self, relative: &str) -> Result<Vec<u8>, UnpackError> {
        std::fs::read(self.root.join(relative)).map_err(|e| unavailable(&self.reference, e))
    }

    fn malformed(&self, reason: String) -> UnpackError {
        UnpackError::MalformedMetadata {
            reference: self.reference.clone(),
            reason,
        }
    }

    fn resolution(&self) -> Result<Resolution, UnpackError> {
        if !self.files.iter().any(|f| f == METADATA_PATH) {
            return Err(self.malformed(format!("missing {}", METADATA_PATH)));
        }

        let mut hasher = TreeHasher::new();
        let mut metadata = None;
        for relative in &self.files {
            let contents = self.read(relative)?;
            if relative == METADATA_PATH {
                let text = String::from_utf8_lossy(&contents);
                metadata = Some(PackageMetadata::parse(&self.reference, &text)?);
            }
            hasher.add_file(relative, &contents);
        }

        Ok(Resolution {
            digest: hasher.finalize(),
            dependencies: metadata.unwrap_or_default().package_dependencies(),
        })
    }

    fn manifests(&self) -> Result<Vec<Manifest>, UnpackError> {
        let mut manifests = Vec::new();
        for relative in &self.files {
            if relative.starts_with(".registry/") || !is_yaml(relative) {
                continue;
            }
            let contents = self.read(relative)?;
            let text = String::from_utf8(contents)
                .map_err(|e| self.malformed(format!("{}: {}", relative, e)))?;
            self.parse_documents(relative, &text, &mut manifests)?;
        }
        manifests.sort_by(|a, b| a.id().cmp(&b.id()));
        Ok(manifests)
    }

    fn parse_documents(
        &self,
        relative: &str,
        text: &str,
        out: &mut Vec<Manifest>,
    ) -> Result<(), UnpackError> {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| self.malformed(format!("{}: {}", relative, e)))?;
            if value.is_null() {
                continue;
            }

            let kind = value.get("kind").and_then(|k| k.as_str());
            let name = value
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(|n| n.as_str());
            let (Some(kind), Some(name)) = (kind, name) else {
                return Err(self.malformed(format!("{}: document without kind or metadata.name", relative)));
            };

            let kind = match kind.parse::<ManifestKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    debug!(file = %relative, %kind, "skipping unsupported resource kind");
                    continue;
                }
            };

            let body = serde_json::to_value(&value).map_err(|e| {
                warn!(file = %relative, error = %e, "manifest is not representable as JSON");
                self.malformed(format!("{}: {}", relative, e))
            })?;
            out.push(Manifest::new(kind, name, body));
        }
        Ok(())
    }
}

fn is_yaml(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}
