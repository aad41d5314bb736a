// src/store/mod.rs

//! Object store contract
//!
//! The reconcilers persist everything through [`Store`]: a versioned
//! key-value store with optimistic concurrency. Every read returns a
//! [`Version`] token; every write must present the token it read and fails
//! with [`crate::Error::Conflict`] if another writer got there first.
//!
//! ```text
//! reconciler A: get ──(v7)────────────── update(v7) ── OK (v8)
//! reconciler B:    get ──(v7)──────────────────── update(v7) ── Conflict
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{Object, ObjectMeta};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::broadcast;

/// Opaque version token returned by reads and checked on writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object together with the version it was read at
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub object: T,
    pub version: Version,
}

/// Label selector for [`Store::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    labels: BTreeMap<String, String>,
}

impl Selector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| meta.labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// What happened to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    /// Spec or metadata changed
    Updated,
    /// Only status changed; reconcilers do not react to their own writes
    StatusUpdated,
}

/// Change notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub name: String,
    pub change: ChangeKind,
}

/// Versioned object store for one object kind
#[async_trait]
pub trait Store<T: Object>: Send + Sync {
    /// Read an object; `NotFound` if it does not exist
    async fn get(&self, name: &str) -> Result<Versioned<T>>;

    /// Create a new object; `AlreadyExists` if the name is taken
    async fn create(&self, object: T) -> Result<Version>;

    /// Replace an object; `Conflict` unless `version` is current
    async fn update(&self, object: T, version: Version) -> Result<Version>;

    /// Replace an object's status; same concurrency rules as `update`
    async fn update_status(&self, object: T, version: Version) -> Result<Version>;

    /// All objects matching the selector
    async fn list(&self, selector: &Selector) -> Result<Vec<Versioned<T>>>;

    /// Change notifications for this kind
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}
