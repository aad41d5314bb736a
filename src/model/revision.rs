// src/model/revision.rs

//! Package revision kinds
//!
//! A revision is named after the content digest it was created from. After
//! creation only `spec.desiredState` (owned by whoever rolls packages out)
//! and the status change.

use super::{ConditionedStatus, Object, ObjectMeta, PackageRevision};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation intent for a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DesiredState {
    /// Resources are owned exclusively by this revision
    Active,
    /// Resources are only referenced by this revision
    #[default]
    Inactive,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Inactive => write!(f, "Inactive"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRevisionSpec {
    /// Package reference this revision was resolved from
    pub image: String,
    pub desired_state: DesiredState,
    pub revision: i64,
    /// Dependency references declared by the content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageRevisionStatus {
    #[serde(flatten)]
    pub conditioned: ConditionedStatus,
}

/// Installed revision of a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRevision {
    pub metadata: ObjectMeta,
    pub spec: PackageRevisionSpec,
    #[serde(default)]
    pub status: PackageRevisionStatus,
}

impl Object for ProviderRevision {
    const KIND: &'static str = "ProviderRevision";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl PackageRevision for ProviderRevision {
    fn source(&self) -> &str {
        &self.spec.image
    }

    fn set_source(&mut self, source: String) {
        self.spec.image = source;
    }

    fn desired_state(&self) -> DesiredState {
        self.spec.desired_state
    }

    fn set_desired_state(&mut self, state: DesiredState) {
        self.spec.desired_state = state;
    }

    fn revision(&self) -> i64 {
        self.spec.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.spec.revision = revision;
    }

    fn dependencies(&self) -> &[String] {
        &self.spec.depends_on
    }

    fn set_dependencies(&mut self, dependencies: Vec<String>) {
        self.spec.depends_on = dependencies;
    }

    fn conditioned(&self) -> &ConditionedStatus {
        &self.status.conditioned
    }

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status.conditioned
    }
}

/// Installed revision of a configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationRevision {
    pub metadata: ObjectMeta,
    pub spec: PackageRevisionSpec,
    #[serde(default)]
    pub status: PackageRevisionStatus,
}

impl Object for ConfigurationRevision {
    const KIND: &'static str = "ConfigurationRevision";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl PackageRevision for ConfigurationRevision {
    fn source(&self) -> &str {
        &self.spec.image
    }

    fn set_source(&mut self, source: String) {
        self.spec.image = source;
    }

    fn desired_state(&self) -> DesiredState {
        self.spec.desired_state
    }

    fn set_desired_state(&mut self, state: DesiredState) {
        self.spec.desired_state = state;
    }

    fn revision(&self) -> i64 {
        self.spec.revision
    }

    fn set_revision(&mut self, revision: i64) {
        self.spec.revision = revision;
    }

    fn dependencies(&self) -> &[String] {
        &self.spec.depends_on
    }

    fn set_dependencies(&mut self, dependencies: Vec<String>) {
        self.spec.depends_on = dependencies;
    }

    fn conditioned(&self) -> &ConditionedStatus {
        &self.status.conditioned
    }

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status.conditioned
    }
}
