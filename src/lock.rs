// src/lock.rs

//! Package ledger
//!
//! The package lock is a single shared object recording every package known
//! to the system and the dependencies it declared when it was registered.
//! All package reconcilers read it, rebuild the dependency graph from it and
//! write it back through a compare-and-swap commit:
//!
//! 1. [`LockSnapshot::load`] reads the ledger and its version token
//! 2. [`LockSnapshot::graph`] rebuilds the dependency graph
//! 3. [`LockSnapshot::upsert`] stages a new entry (not yet durable)
//! 4. [`LockSnapshot::commit`] writes it back, or fails with
//!    [`crate::Error::Conflict`] if someone else committed since step 1
//!
//! A conflicting writer reloads and recomputes from scratch. Entries are
//! never removed here.

use crate::error::{Error, Result};
use crate::model::{Object, ObjectMeta};
use crate::reference::canonical_name;
use crate::resolver::{DependencyGraph, GraphError};
use crate::store::{Store, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Name of the ledger object
pub const LOCK_NAME: &str = "packages";

/// One registered package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    /// Name of the package object that registered this entry
    pub name: String,
    /// Reference the package was registered from
    pub image: String,
    /// Declared dependency references
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Ledger contents keyed by canonical package name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLockSpec {
    #[serde(default)]
    pub packages: BTreeMap<String, LockEntry>,
}

impl PackageLockSpec {
    /// Build the dependency graph for this ledger
    ///
    /// Fails if an entry depends on a package that is not itself registered.
    pub fn to_graph(&self) -> std::result::Result<DependencyGraph, GraphError> {
        let mut graph = DependencyGraph::new();
        graph.add_nodes(self.packages.keys().cloned())?;
        for (name, entry) in &self.packages {
            let deps: Vec<String> = entry.dependencies.iter().map(|d| canonical_name(d)).collect();
            graph.add_edges(name, &deps)?;
        }
        Ok(graph)
    }
}

/// The stored ledger object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageLock {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PackageLockSpec,
}

impl PackageLock {
    /// Empty ledger with the well-known name
    pub fn new() -> Self {
        Self {
            metadata: ObjectMeta::new(LOCK_NAME),
            spec: PackageLockSpec::default(),
        }
    }
}

impl Object for PackageLock {
    const KIND: &'static str = "PackageLock";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Working copy of the ledger for one reconciliation pass
#[derive(Debug, Clone)]
pub struct LockSnapshot {
    lock: PackageLock,
    version: Version,
    staged: bool,
}

impl LockSnapshot {
    /// Read the ledger and its version token
    pub async fn load(store: &dyn Store<PackageLock>) -> Result<Self> {
        let current = store.get(LOCK_NAME).await?;
        debug!(version = %current.version, entries = current.object.spec.packages.len(), "loaded package lock");
        Ok(Self {
            lock: current.object,
            version: current.version,
            staged: false,
        })
    }

    /// Canonical ledger key for a package reference
    pub fn resolve(reference: &str) -> String {
        canonical_name(reference)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock.spec.packages.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&LockEntry> {
        self.lock.spec.packages.get(name)
    }

    pub fn spec(&self) -> &PackageLockSpec {
        &self.lock.spec
    }

    /// Version token this snapshot was read at
    pub fn version(&self) -> Version {
        self.version
    }

    /// Dependency graph of the snapshot as loaded plus staged entries
    pub fn graph(&self) -> std::result::Result<DependencyGraph, GraphError> {
        self.lock.spec.to_graph()
    }

    /// Stage an entry; nothing is durable until [`commit`](Self::commit)
    pub fn upsert(&mut self, name: impl Into<String>, entry: LockEntry) {
        self.lock.spec.packages.insert(name.into(), entry);
        self.staged = true;
    }

    /// Write staged entries back if nobody else committed since `load`
    pub async fn commit(self, store: &dyn Store<PackageLock>) -> Result<Version> {
        if !self.staged {
            return Ok(self.version);
        }
        let entries = self.lock.spec.packages.len();
        let version = store.update(self.lock, self.version).await?;
        info!(%version, entries, "committed package lock");
        Ok(version)
    }
}

/// Create an empty ledger unless one exists
pub async fn ensure_lock(store: &dyn Store<PackageLock>) -> Result<Version> {
    match store.get(LOCK_NAME).await {
        Ok(current) => Ok(current.version),
        Err(e) if e.is_not_found() => match store.create(PackageLock::new()).await {
            Ok(version) => Ok(version),
            // Lost a creation race; use the winner's ledger
            Err(Error::AlreadyExists { .. }) => Ok(store.get(LOCK_NAME).await?.version),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn entry(name: &str, image: &str, deps: &[&str]) -> LockEntry {
        LockEntry {
            name: name.to_string(),
            image: image.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_to_graph_canonicalizes_dependencies() {
        let mut spec = PackageLockSpec::default();
        spec.packages.insert("pkg-b".to_string(), entry("b", "pkg-b:v1", &[]));
        spec.packages.insert("pkg-a".to_string(), entry("a", "pkg-a:v1", &["pkg-b:v3"]));

        let graph = spec.to_graph().unwrap();
        assert_eq!(graph.dependencies("pkg-a").unwrap(), ["pkg-b".to_string()]);
        assert_eq!(graph.sort().unwrap(), vec!["pkg-b", "pkg-a"]);
    }

    #[test]
    fn test_to_graph_rejects_unregistered_dependency() {
        let mut spec = PackageLockSpec::default();
        spec.packages.insert("pkg-a".to_string(), entry("a", "pkg-a:v1", &["pkg-b"]));
        assert!(matches!(spec.to_graph(), Err(GraphError::UnknownNode { .. })));
    }

    #[tokio::test]
    async fn test_load_missing_lock_is_not_found() {
        let store: MemoryStore<PackageLock> = MemoryStore::new();
        let err = LockSnapshot::load(&store).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_commit_without_changes_is_noop() {
        let store: MemoryStore<PackageLock> = MemoryStore::new();
        let version = ensure_lock(&store).await.unwrap();
        let snapshot = LockSnapshot::load(&store).await.unwrap();
        assert_eq!(snapshot.commit(&store).await.unwrap(), version);
    }

    #[tokio::test]
    async fn test_concurrent_commits_one_wins() {
        let store: MemoryStore<PackageLock> = MemoryStore::new();
        ensure_lock(&store).await.unwrap();

        let mut first = LockSnapshot::load(&store).await.unwrap();
        let mut second = LockSnapshot::load(&store).await.unwrap();
        first.upsert("pkg-a", entry("a", "pkg-a:v1", &[]));
        second.upsert("pkg-b", entry("b", "pkg-b:v1", &[]));

        first.commit(&store).await.unwrap();
        let err = second.commit(&store).await.unwrap_err();
        assert!(err.is_conflict());

        // Loser reloads, recomputes and retries; nothing is lost
        let mut retry = LockSnapshot::load(&store).await.unwrap();
        retry.upsert("pkg-b", entry("b", "pkg-b:v1", &[]));
        retry.commit(&store).await.unwrap();

        let finished = LockSnapshot::load(&store).await.unwrap();
        assert!(finished.contains("pkg-a"));
        assert!(finished.contains("pkg-b"));
    }

    #[tokio::test]
    async fn test_ensure_lock_is_idempotent() {
        let store: MemoryStore<PackageLock> = MemoryStore::new();
        let first = ensure_lock(&store).await.unwrap();
        let second = ensure_lock(&store).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_strips_tag() {
        assert_eq!(LockSnapshot::resolve("pkg-x:v1"), "pkg-x");
    }
}
