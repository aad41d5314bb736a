// src/store/memory.rs

//! In-process implementation of the store contract

use super::{ChangeKind, Selector, Store, Version, Versioned, WatchEvent};
use crate::error::{Error, Result};
use crate::model::Object;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use tracing::trace;

/// Capacity of the change notification channel
const WATCH_CAPACITY: usize = 1024;

/// Versioned in-memory store for one object kind
///
/// Versions come from a single counter, so every successful write yields a
/// token no earlier read could hold. `update_status` replaces the whole
/// object like `update`; it only differs in the change it announces.
pub struct MemoryStore<T: Object> {
    objects: RwLock<HashMap<String, Versioned<T>>>,
    next_version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
}

impl<T: Object> MemoryStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            events,
        }
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn bump(&self) -> Version {
        Version::new(self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    fn notify(&self, name: &str, change: ChangeKind) {
        // No subscribers is fine
        let _ = self.events.send(WatchEvent {
            name: name.to_string(),
            change,
        });
    }

    async fn replace(&self, object: T, version: Version, change: ChangeKind) -> Result<Version> {
        let name = object.name().to_string();
        let new_version = {
            let mut objects = self.objects.write().await;
            let current = objects.get(&name).ok_or_else(|| Error::NotFound {
                kind: T::KIND,
                name: name.clone(),
            })?;
            if current.version != version {
                trace!(kind = T::KIND, %name, held = %version, current = %current.version, "version conflict");
                return Err(Error::Conflict {
                    kind: T::KIND,
                    name,
                });
            }
            let new_version = self.bump();
            objects.insert(
                name.clone(),
                Versioned {
                    object,
                    version: new_version,
                },
            );
            new_version
        };
        self.notify(&name, change);
        Ok(new_version)
    }
}

impl<T: Object> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Object> Store<T> for MemoryStore<T> {
    async fn get(&self, name: &str) -> Result<Versioned<T>> {
        self.objects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: T::KIND,
                name: name.to_string(),
            })
    }

    async fn create(&self, object: T) -> Result<Version> {
        let name = object.name().to_string();
        let version = {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&name) {
                return Err(Error::AlreadyExists {
                    kind: T::KIND,
                    name,
                });
            }
            let version = self.bump();
            objects.insert(name.clone(), Versioned { object, version });
            version
        };
        self.notify(&name, ChangeKind::Created);
        Ok(version)
    }

    async fn update(&self, object: T, version: Version) -> Result<Version> {
        self.replace(object, version, ChangeKind::Updated).await
    }

    async fn update_status(&self, object: T, version: Version) -> Result<Version> {
        self.replace(object, version, ChangeKind::StatusUpdated).await
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<Versioned<T>>> {
        let objects = self.objects.read().await;
        let mut matched: Vec<Versioned<T>> = objects
            .values()
            .filter(|v| selector.matches(v.object.meta()))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.object.name().cmp(b.object.name()));
        Ok(matched)
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
