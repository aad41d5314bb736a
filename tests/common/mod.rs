// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use crank::{
    DirectoryUnpacker, MemoryRecorder, MemoryStore, OwnershipIndex, PackageLock,
    PackageReconciler, Provider, ProviderRevision, RevisionReconciler, Unpacker, ensure_lock,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A registry directory in a temp dir.
///
/// Keep the value alive for as long as the registry is used.
pub struct Registry {
    dir: TempDir,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Publish a package at `path` (`<registry>/<name>/<tag>`).
    ///
    /// Each resource is `(kind, name)`; every resource gets its own file.
    pub fn publish(&self, path: &str, depends_on: &[&str], resources: &[(&str, &str)]) {
        let package = self.root().join(path);
        std::fs::create_dir_all(package.join(".registry")).unwrap();

        let mut metadata = String::from("dependsOn:\n");
        for dep in depends_on {
            metadata.push_str(&format!("  - package: {}\n", dep));
        }
        if depends_on.is_empty() {
            metadata = String::from("dependsOn: []\n");
        }
        std::fs::write(package.join(".registry/app.yaml"), metadata).unwrap();

        std::fs::create_dir_all(package.join("resources")).unwrap();
        for (kind, name) in resources {
            std::fs::write(
                package.join("resources").join(format!("{}.yaml", name)),
                format!("kind: {}\nmetadata:\n  name: {}\n", kind, name),
            )
            .unwrap();
        }
    }

    pub fn unpacker(&self) -> Arc<DirectoryUnpacker> {
        Arc::new(DirectoryUnpacker::new(self.root()))
    }
}

/// Provider stores, reconcilers and collaborators wired together.
pub struct Cluster {
    pub providers: Arc<MemoryStore<Provider>>,
    pub revisions: Arc<MemoryStore<ProviderRevision>>,
    pub lock: Arc<MemoryStore<PackageLock>>,
    pub unpacker: Arc<dyn Unpacker>,
    pub index: Arc<OwnershipIndex>,
    pub recorder: Arc<MemoryRecorder>,
}

impl Cluster {
    /// Stores and an ensured ledger around `unpacker`
    pub async fn new(unpacker: Arc<dyn Unpacker>) -> Self {
        let lock: Arc<MemoryStore<PackageLock>> = Arc::new(MemoryStore::new());
        ensure_lock(&*lock).await.unwrap();
        Self {
            providers: Arc::new(MemoryStore::new()),
            revisions: Arc::new(MemoryStore::new()),
            lock,
            unpacker,
            index: Arc::new(OwnershipIndex::new()),
            recorder: Arc::new(MemoryRecorder::new()),
        }
    }

    pub fn package_reconciler(&self) -> PackageReconciler<Provider, ProviderRevision> {
        PackageReconciler::new(
            self.providers.clone(),
            self.revisions.clone(),
            self.lock.clone(),
            self.unpacker.clone(),
            self.recorder.clone(),
        )
    }

    pub fn revision_reconciler(&self) -> RevisionReconciler<ProviderRevision> {
        RevisionReconciler::new(
            self.revisions.clone(),
            self.unpacker.clone(),
            self.index.clone(),
            self.recorder.clone(),
        )
    }
}
