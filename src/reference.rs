// src/reference.rs

//! Package references and canonical names
//!
//! A reference looks like `registry/name:tag` (optionally with an
//! `@sha256:...` digest). The canonical name drops the tag and digest and is
//! the identity used for dependency graph nodes and ledger keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag used when a reference carries none
pub const DEFAULT_TAG: &str = "latest";

/// A reference to package content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageReference(String);

impl PackageReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference with the tag and digest removed
    ///
    /// Only the last path segment is inspected for a tag, so a registry
    /// port (`localhost:5000/pkg:v1`) survives.
    pub fn canonical_name(&self) -> &str {
        let without_digest = self.0.split('@').next().unwrap_or(&self.0);
        let segment_start = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
        match without_digest[segment_start..].find(':') {
            Some(colon) => &without_digest[..segment_start + colon],
            None => without_digest,
        }
    }

    /// Tag component, if any
    pub fn tag(&self) -> Option<&str> {
        let without_digest = self.0.split('@').next().unwrap_or(&self.0);
        let canonical = self.canonical_name();
        without_digest
            .strip_prefix(canonical)
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|tag| !tag.is_empty())
    }

    /// Tag component, falling back to [`DEFAULT_TAG`]
    pub fn tag_or_default(&self) -> &str {
        self.tag().unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PackageReference {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Canonical name of a raw reference string
pub fn canonical_name(reference: &str) -> String {
    PackageReference::new(reference).canonical_name().to_string()
}
