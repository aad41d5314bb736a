// src/ownership.rs

//! Ownership of produced resources
//!
//! Revisions apply the resources their content declares through an
//! [`Applicator`]. Each resource keeps a list of owner references; at most
//! one of them is the controller. An `Active` revision takes control of
//! every resource it declares, an `Inactive` one only registers interest
//! and never changes who holds control.
//!
//! [`OwnershipIndex`] is the in-process applicator. Each apply is a single
//! read-merge-write under the index lock, so concurrent revisions never see
//! a half-merged owner list.

use crate::model::{Manifest, OwnerReference, ResourceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Errors from applying a produced resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Another owner already controls the resource
    #[error("{resource} is controlled by {controller}")]
    NotControllable { resource: String, controller: String },
}

/// How an owner relates to a resource it applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerMode {
    /// Sole controller; fails if someone else controls the resource
    Controller,
    /// Non-controlling owner
    Owner,
}

/// A resource as currently applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResource {
    pub manifest: Manifest,
    pub owner_references: Vec<OwnerReference>,
}

impl AppliedResource {
    /// The controlling owner, if any
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }

    pub fn is_owned_by(&self, owner: &OwnerReference) -> bool {
        self.owner_references.iter().any(|o| o.uid == owner.uid)
    }

    fn set_owner(&mut self, owner: OwnerReference) {
        match self.owner_references.iter_mut().find(|o| o.uid == owner.uid) {
            Some(existing) => *existing = owner,
            None => self.owner_references.push(owner),
        }
    }
}

/// Applies produced resources on behalf of an owner
#[async_trait]
pub trait Applicator: Send + Sync {
    async fn apply(
        &self,
        manifest: &Manifest,
        owner: &OwnerReference,
        mode: OwnerMode,
    ) -> Result<(), ApplyError>;
}

/// In-process record of applied resources and their owners
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    resources: RwLock<HashMap<ResourceId, AppliedResource>>,
}

impl OwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &ResourceId) -> Option<AppliedResource> {
        self.resources.read().await.get(id).cloned()
    }

    /// All applied resources, ordered by id
    pub async fn list(&self) -> Vec<(ResourceId, AppliedResource)> {
        let resources = self.resources.read().await;
        let mut all: Vec<_> = resources
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}

#[async_trait]
impl Applicator for OwnershipIndex {
    async fn apply(
        &self,
        manifest: &Manifest,
        owner: &OwnerReference,
        mode: OwnerMode,
    ) -> Result<(), ApplyError> {
        let id = manifest.id();
        let mut resources = self.resources.write().await;

        let Some(mut current) = resources.get(&id).cloned() else {
            let owner = match mode {
                OwnerMode::Controller => owner.clone().as_controller(),
                OwnerMode::Owner => owner.clone().as_owner(),
            };
            debug!(resource = %id, %owner, ?mode, "created resource");
            resources.insert(
                id,
                AppliedResource {
                    manifest: manifest.clone(),
                    owner_references: vec![owner],
                },
            );
            return Ok(());
        };

        match mode {
            OwnerMode::Controller => {
                if let Some(controller) = current.controller()
                    && controller.uid != owner.uid
                {
                    return Err(ApplyError::NotControllable {
                        resource: id.to_string(),
                        controller: controller.to_string(),
                    });
                }
                current.set_owner(owner.clone().as_controller());
                current.manifest = manifest.clone();
            }
            OwnerMode::Owner => {
                // Existing references, a controller included, stay as they are
                if !current.is_owned_by(owner) {
                    current.owner_references.push(owner.clone().as_owner());
                }
                if current.controller().is_some_and(|c| c.uid != owner.uid) {
                    trace!(resource = %id, %owner, "resource controlled elsewhere; body left alone");
                } else {
                    current.manifest = manifest.clone();
                }
            }
        }

        debug!(resource = %id, %owner, ?mode, owners = current.owner_references.len(), "updated resource");
        resources.insert(id, current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ManifestKind;
    use uuid::Uuid;

    fn owner(name: &str) -> OwnerReference {
        OwnerReference {
            kind: "ProviderRevision".to_string(),
            name: name.to_string(),
            uid: Uuid::new_v4(),
            controller: false,
        }
    }

    fn crd(version: &str) -> Manifest {
        Manifest::new(
            ManifestKind::CustomResourceDefinition,
            "buckets.aws.crank.io",
            serde_json::json!({ "spec": { "version": version } }),
        )
    }

    #[tokio::test]
    async fn test_inactive_then_active_takes_control() {
        let index = OwnershipIndex::new();
        let rev = owner("d1");

        index.apply(&crd("v1"), &rev, OwnerMode::Owner).await.unwrap();
        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert!(applied.controller().is_none());
        assert!(applied.is_owned_by(&rev));

        index.apply(&crd("v1"), &rev, OwnerMode::Controller).await.unwrap();
        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert_eq!(applied.controller().map(|c| c.uid), Some(rev.uid));
        assert_eq!(applied.owner_references.len(), 1);
    }

    #[tokio::test]
    async fn test_active_fails_when_controlled_elsewhere() {
        let index = OwnershipIndex::new();
        let first = owner("d1");
        let second = owner("d2");

        index.apply(&crd("v1"), &first, OwnerMode::Controller).await.unwrap();
        let err = index
            .apply(&crd("v2"), &second, OwnerMode::Controller)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::NotControllable { .. }));

        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert_eq!(applied.manifest.body["spec"]["version"], "v1");
    }

    #[tokio::test]
    async fn test_inactive_keeps_other_controller_and_body() {
        let index = OwnershipIndex::new();
        let active = owner("d1");
        let inactive = owner("d2");

        index.apply(&crd("v1"), &active, OwnerMode::Controller).await.unwrap();
        index.apply(&crd("v2"), &inactive, OwnerMode::Owner).await.unwrap();

        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert_eq!(applied.controller().map(|c| c.uid), Some(active.uid));
        assert!(applied.is_owned_by(&inactive));
        assert_eq!(applied.manifest.body["spec"]["version"], "v1");
    }

    #[tokio::test]
    async fn test_inactive_keeps_own_control() {
        let index = OwnershipIndex::new();
        let rev = owner("d1");
        let other = owner("d2");

        index.apply(&crd("v1"), &rev, OwnerMode::Controller).await.unwrap();
        index.apply(&crd("v2"), &rev, OwnerMode::Owner).await.unwrap();
        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert_eq!(applied.controller().map(|c| c.uid), Some(rev.uid));
        assert_eq!(applied.owner_references.len(), 1);
        assert_eq!(applied.manifest.body["spec"]["version"], "v2");

        // Still controlled, so another revision cannot take over
        let err = index
            .apply(&crd("v3"), &other, OwnerMode::Controller)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::NotControllable { .. }));
        let applied = index.get(&crd("v1").id()).await.unwrap();
        assert_eq!(applied.controller().map(|c| c.uid), Some(rev.uid));
        assert!(!applied.is_owned_by(&other));
    }

    #[tokio::test]
    async fn test_list_is_ordered() {
        let index = OwnershipIndex::new();
        let rev = owner("d1");
        let composition = Manifest::new(ManifestKind::Composition, "a", serde_json::json!({}));
        index.apply(&composition, &rev, OwnerMode::Owner).await.unwrap();
        index.apply(&crd("v1"), &rev, OwnerMode::Owner).await.unwrap();

        let ids: Vec<_> = index.list().await.into_iter().map(|(id, _)| id.kind).collect();
        assert_eq!(ids, vec![ManifestKind::CustomResourceDefinition, ManifestKind::Composition]);
        assert_eq!(index.len().await, 2);
    }
}
