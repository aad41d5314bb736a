// src/commands/sort.rs
//! Installation order of a package ledger

use anyhow::{Context, Result};
use crank::{PackageLock, PackageLockSpec};
use std::path::Path;

/// Read a ledger file and print its packages, dependencies first
///
/// Accepts either a full ledger object (`metadata` + `spec`) or just its
/// spec, in YAML or JSON.
pub fn cmd_sort(lockfile: &Path) -> Result<()> {
    let content = std::fs::read_to_string(lockfile)
        .with_context(|| format!("Failed to read {}", lockfile.display()))?;
    let spec = parse_lock(&content)
        .with_context(|| format!("Failed to parse {}", lockfile.display()))?;

    let order = spec.to_graph()?.sort()?;
    if order.is_empty() {
        println!("Ledger is empty");
        return Ok(());
    }

    println!("Installation order ({} packages):", order.len());
    for (i, name) in order.iter().enumerate() {
        let deps = spec
            .packages
            .get(name)
            .map(|entry| entry.dependencies.len())
            .unwrap_or(0);
        if deps == 0 {
            println!("  {:>3}. {}", i + 1, name);
        } else {
            println!("  {:>3}. {} ({} dependencies)", i + 1, name, deps);
        }
    }
    Ok(())
}

fn parse_lock(content: &str) -> Result<PackageLockSpec> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let spec = if value.get("spec").is_some() {
        serde_yaml::from_value::<PackageLock>(value)?.spec
    } else {
        serde_yaml::from_value::<PackageLockSpec>(value)?
    };
    Ok(spec)
}
