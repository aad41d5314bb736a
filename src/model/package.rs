// src/model/package.rs

//! Package kinds: providers and configurations

use super::{ConditionedStatus, Object, ObjectMeta, Package};
use serde::{Deserialize, Serialize};

/// Requested package content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// Package reference, e.g. `registry/provider-aws:v1.2.0`
    pub package: String,
}

/// Observed state of a package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(flatten)]
    pub conditioned: ConditionedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
}

/// Request to install a provider package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provider {
    pub metadata: ObjectMeta,
    pub spec: PackageSpec,
    #[serde(default)]
    pub status: PackageStatus,
}

impl Provider {
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: PackageSpec { package: package.into() },
            status: PackageStatus::default(),
        }
    }
}

impl Object for Provider {
    const KIND: &'static str = "Provider";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Package for Provider {
    fn source(&self) -> &str {
        &self.spec.package
    }

    fn set_source(&mut self, source: String) {
        self.spec.package = source;
    }

    fn current_revision(&self) -> Option<&str> {
        self.status.current_revision.as_deref()
    }

    fn set_current_revision(&mut self, digest: String) {
        self.status.current_revision = Some(digest);
    }

    fn conditioned(&self) -> &ConditionedStatus {
        &self.status.conditioned
    }

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status.conditioned
    }
}

/// Request to install a configuration package
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub metadata: ObjectMeta,
    pub spec: PackageSpec,
    #[serde(default)]
    pub status: PackageStatus,
}

impl Configuration {
    pub fn new(name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: PackageSpec { package: package.into() },
            status: PackageStatus::default(),
        }
    }
}

impl Object for Configuration {
    const KIND: &'static str = "Configuration";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Package for Configuration {
    fn source(&self) -> &str {
        &self.spec.package
    }

    fn set_source(&mut self, source: String) {
        self.spec.package = source;
    }

    fn current_revision(&self) -> Option<&str> {
        self.status.current_revision.as_deref()
    }

    fn set_current_revision(&mut self, digest: String) {
        self.status.current_revision = Some(digest);
    }

    fn conditioned(&self) -> &ConditionedStatus {
        &self.status.conditioned
    }

    fn conditioned_mut(&mut self) -> &mut ConditionedStatus {
        &mut self.status.conditioned
    }
}
