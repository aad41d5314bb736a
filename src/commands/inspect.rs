// src/commands/inspect.rs
//! Resolve a package from a registry directory

use anyhow::Result;
use crank::{DirectoryUnpacker, Unpacker};
use serde_json::json;
use std::path::Path;
use tracing::info;

/// Print the digest, dependencies and resources of `reference` as JSON
pub fn cmd_inspect(reference: &str, registry: &Path) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = rt.block_on(inspect(reference, registry))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn inspect(reference: &str, registry: &Path) -> Result<serde_json::Value> {
    let unpacker = DirectoryUnpacker::new(registry);
    info!(%reference, registry = %registry.display(), "inspecting package");

    let resolution = unpacker.resolve(reference).await?;
    let resources = unpacker.list_resources(reference).await?;

    Ok(json!({
        "reference": reference,
        "digest": resolution.digest,
        "dependencies": resolution.dependencies,
        "resources": resources
            .iter()
            .map(|m| m.id().to_string())
            .collect::<Vec<_>>(),
    }))
}
