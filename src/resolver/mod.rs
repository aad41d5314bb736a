// src/resolver/mod.rs

//! Dependency resolution
//!
//! The dependency graph is keyed by canonical package name. It is never
//! persisted: each reconciliation pass rebuilds it from the package ledger
//! (see [`crate::lock::PackageLockSpec::to_graph`]) so graph state cannot
//! drift from ledger state.

mod graph;

pub use graph::{DependencyGraph, GraphError};
