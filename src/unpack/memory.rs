// src/unpack/memory.rs

//! In-memory unpacker
//!
//! Packages are registered up front with their digest, dependencies and
//! manifests. Failures can be injected per reference, and every call is
//! counted, which is what the reconciler tests rely on.

use super::{Resolution, UnpackError, Unpacker};
use crate::model::Manifest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct StaticPackage {
    resolution: Resolution,
    manifests: Vec<Manifest>,
}

/// Unpacker serving packages registered in memory
#[derive(Debug, Default)]
pub struct StaticUnpacker {
    packages: Mutex<HashMap<String, StaticPackage>>,
    failures: Mutex<HashMap<String, UnpackError>>,
    resolve_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl StaticUnpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the content behind `reference`
    pub fn insert(
        &self,
        reference: impl Into<String>,
        digest: impl Into<String>,
        dependencies: &[&str],
        manifests: Vec<Manifest>,
    ) {
        let package = StaticPackage {
            resolution: Resolution {
                digest: digest.into(),
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            },
            manifests,
        };
        if let Ok(mut packages) = self.packages.lock() {
            packages.insert(reference.into(), package);
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with_package(
        self,
        reference: impl Into<String>,
        digest: impl Into<String>,
        dependencies: &[&str],
        manifests: Vec<Manifest>,
    ) -> Self {
        self.insert(reference, digest, dependencies, manifests);
        self
    }

    /// Make every call for `reference` fail with `error`
    pub fn fail(&self, reference: impl Into<String>, error: UnpackError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(reference.into(), error);
        }
    }

    /// Stop failing calls for `reference`
    pub fn recover(&self, reference: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(reference);
        }
    }

    /// Number of `resolve` calls so far
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_resources` calls so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, reference: &str) -> Result<StaticPackage, UnpackError> {
        let poisoned = || UnpackError::RegistryUnavailable {
            reference: reference.to_string(),
            reason: "unpacker state poisoned".to_string(),
        };
        if let Some(error) = self.failures.lock().map_err(|_| poisoned())?.get(reference) {
            return Err(error.clone());
        }
        self.packages
            .lock()
            .map_err(|_| poisoned())?
            .get(reference)
            .cloned()
            .ok_or_else(|| UnpackError::UnresolvableReference {
                reference: reference.to_string(),
                reason: "no such package".to_string(),
            })
    }
}

#[async_trait]
impl Unpacker for StaticUnpacker {
    async fn resolve(&self, reference: &str) -> Result<Resolution, UnpackError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(reference)?.resolution)
    }

    async fn list_resources(&self, reference: &str) -> Result<Vec<Manifest>, UnpackError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(reference)?.manifests)
    }
}
