// src/lib.rs

//! Crank Package Manager
//!
//! Dependency resolution and revision reconciliation for packages on a
//! declarative, cluster-style platform.
//!
//! # Architecture
//!
//! - Ledger-first: every known package and its declared dependencies live in
//!   one shared object, updated by compare-and-swap
//! - Graph per pass: the dependency graph is rebuilt from the ledger on every
//!   reconciliation and never persisted
//! - Revisions: one immutable revision per content digest, activated by
//!   flipping its desired state
//! - Level-triggered: reconcilers converge from whatever state they find and
//!   are retried until they do

pub mod config;
pub mod controller;
mod error;
pub mod event;
pub mod hash;
pub mod lock;
pub mod manager;
pub mod model;
pub mod ownership;
pub mod reference;
pub mod resolver;
pub mod store;
pub mod unpack;

pub use config::{ConfigError, ManagerConfig, PackageDeclaration, load_config, parse_config_file};
pub use controller::{
    PackageReconciler, Reconciled, Reconciler, RevisionReconciler, Timings,
};
pub use error::{Error, Result};
pub use event::{Event, EventRecorder, MemoryRecorder, NopRecorder, Severity, TracingRecorder};
pub use lock::{LOCK_NAME, LockEntry, LockSnapshot, PackageLock, PackageLockSpec, ensure_lock};
pub use manager::{Manager, WorkQueue};
pub use model::{
    Configuration, ConfigurationRevision, DesiredState, Manifest, ManifestKind, Object,
    ObjectMeta, OwnerReference, PACKAGE_LABEL, Package, PackageRevision, Provider,
    ProviderRevision,
};
pub use ownership::{Applicator, ApplyError, OwnerMode, OwnershipIndex};
pub use reference::{PackageReference, canonical_name};
pub use resolver::{DependencyGraph, GraphError};
pub use store::{MemoryStore, Selector, Store, Version, Versioned};
pub use unpack::{DirectoryUnpacker, Resolution, StaticUnpacker, UnpackError, Unpacker};
