// src/error.rs

//! Crate-wide error type
//!
//! Every reconciliation failure maps onto one of these variants. Only
//! `NotFound` on a primary object stops a reconciliation loop; everything
//! else is recorded on the object's status and retried.

use crate::config::ConfigError;
use crate::ownership::ApplyError;
use crate::resolver::GraphError;
use crate::unpack::UnpackError;
use thiserror::Error;

/// Errors produced by the store, the reconcilers and their collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Object does not exist in the store
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Object was created twice
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    /// Version token mismatch on write
    #[error("{kind} {name} was modified since it was read")]
    Conflict { kind: &'static str, name: String },

    /// Missing dependency node or dependency cycle
    #[error("dependency validation failed: {0}")]
    Validation(#[from] GraphError),

    /// Package content could not be fetched or parsed
    #[error("cannot unpack package: {0}")]
    Unpack(#[from] UnpackError),

    /// A produced resource could not be applied
    #[error("cannot apply resource: {0}")]
    Apply(#[from] ApplyError),

    /// Reconciliation exceeded its time budget
    #[error("reconcile timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Invalid manager configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object or file could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True when the object is gone and reconciliation should stop
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for crank operations
pub type Result<T> = std::result::Result<T, Error>;
