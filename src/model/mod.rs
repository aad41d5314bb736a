// src/model/mod.rs

//! Declarative package objects
//!
//! Packages are user requests ("install `registry/provider-aws:v1`").
//! Package revisions are immutable installation units, one per content
//! digest a package has resolved to. Both come in two flavours, providers
//! and configurations, that reconcile identically; the reconcilers only see
//! them through the [`Package`] and [`PackageRevision`] capability traits.
//!
//! # Object layout
//!
//! ```text
//! Provider "aws"                      ProviderRevision "3f9a…" (digest)
//!   spec.package: registry/aws:v1       spec.image: registry/aws:v1
//!   status.currentRevision: 3f9a… ───►  spec.desiredState: Inactive
//!   status.conditions                   spec.revision: 1
//!                                       metadata.ownerReferences: [aws (controller)]
//! ```

mod condition;
mod manifest;
mod package;
mod revision;

pub use condition::{
    Condition, ConditionReason, ConditionStatus, ConditionType, ConditionedStatus,
};
pub use manifest::{Manifest, ManifestKind, ResourceId};
pub use package::{Configuration, PackageSpec, PackageStatus, Provider};
pub use revision::{
    ConfigurationRevision, DesiredState, PackageRevisionSpec, PackageRevisionStatus,
    ProviderRevision,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Label put on every revision naming the package that produced it
pub const PACKAGE_LABEL: &str = "crank.io/package";

/// Metadata shared by all stored objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub uid: Uuid,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata with a fresh uid
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4(),
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference, replacing any existing one with the same uid
    pub fn add_owner_reference(&mut self, owner: OwnerReference) {
        match self.owner_references.iter_mut().find(|o| o.uid == owner.uid) {
            Some(existing) => *existing = owner,
            None => self.owner_references.push(owner),
        }
    }

    /// The controlling owner, if any
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }

    /// True when no owner other than `uid` controls this object
    pub fn is_controllable_by(&self, uid: Uuid) -> bool {
        self.controller().is_none_or(|c| c.uid == uid)
    }
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self::new("")
    }
}

/// Reference from an owned object to its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    /// Non-controlling reference to `owner`
    pub fn to<O: Object>(owner: &O) -> Self {
        Self {
            kind: O::KIND.to_string(),
            name: owner.name().to_string(),
            uid: owner.meta().uid,
            controller: false,
        }
    }

    /// Mark this reference as the controlling one
    pub fn as_controller(mut self) -> Self {
        self.controller = true;
        self
    }

    /// Mark this reference as non-controlling
    pub fn as_owner(mut self) -> Self {
        self.controller = false;
        self
    }
}

impl fmt::Display for OwnerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Anything that can be kept in a [`crate::store::Store`]
pub trait Object: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind name used in errors, events and owner references
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }
}

/// Capabilities the package reconciler needs from a package kind
pub trait Package: Object {
    /// Reference of the requested package content
    fn source(&self) -> &str;

    fn set_source(&mut self, source: String);

    /// Digest of the revision this package currently points at
    fn current_revision(&self) -> Option<&str>;

    fn set_current_revision(&mut self, digest: String);

    fn conditioned(&self) -> &ConditionedStatus;

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus;

    fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditioned().get(condition_type)
    }

    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.conditioned_mut().set(conditions);
    }
}

/// Capabilities the reconcilers need from a package revision kind
pub trait PackageRevision: Object + Default {
    /// Reference of the content this revision was created from
    fn source(&self) -> &str;

    fn set_source(&mut self, source: String);

    fn desired_state(&self) -> DesiredState;

    fn set_desired_state(&mut self, state: DesiredState);

    /// Ordinal of this revision among its package's revisions
    fn revision(&self) -> i64;

    fn set_revision(&mut self, revision: i64);

    fn dependencies(&self) -> &[String];

    fn set_dependencies(&mut self, dependencies: Vec<String>);

    fn conditioned(&self) -> &ConditionedStatus;

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus;

    fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditioned().get(condition_type)
    }

    fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.conditioned_mut().set(conditions);
    }
}
