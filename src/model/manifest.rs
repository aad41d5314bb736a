// src/model/manifest.rs

//! Resources produced by package content

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of resource a package may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ManifestKind {
    /// Schema definition for a new resource type
    CustomResourceDefinition,
    /// Template composing other resources
    Composition,
}

impl ManifestKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CustomResourceDefinition => "CustomResourceDefinition",
            Self::Composition => "Composition",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ManifestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CustomResourceDefinition" => Ok(Self::CustomResourceDefinition),
            "Composition" => Ok(Self::Composition),
            other => Err(format!("unsupported manifest kind: {}", other)),
        }
    }
}

/// Identity of a produced resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ManifestKind,
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A resource declared by package content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    /// Full document as declared
    pub body: serde_json::Value,
}

impl Manifest {
    pub fn new(kind: ManifestKind, name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            body,
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId {
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "CustomResourceDefinition".parse::<ManifestKind>(),
            Ok(ManifestKind::CustomResourceDefinition)
        );
        assert_eq!("Composition".parse::<ManifestKind>(), Ok(ManifestKind::Composition));
        assert!("Deployment".parse::<ManifestKind>().is_err());
    }

    #[test]
    fn test_resource_id_display() {
        let m = Manifest::new(ManifestKind::Composition, "xdb.aws", serde_json::json!({}));
        assert_eq!(m.id().to_string(), "Composition/xdb.aws");
    }
}
