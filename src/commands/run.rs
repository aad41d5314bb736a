// src/commands/run.rs
//! Run the reconcilers against in-memory stores

use anyhow::Result;
use crank::config::ManagerConfig;
use crank::{
    Configuration, ConfigurationRevision, DirectoryUnpacker, EventRecorder, Manager,
    MemoryStore, Object, OwnershipIndex, Package, PackageLock, PackageReconciler, Provider,
    ProviderRevision, RevisionReconciler, Selector, Store, TracingRecorder, Unpacker,
    load_config,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Run until Ctrl+C, then print where every package ended up
pub fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(config))
}

async fn run(config: ManagerConfig) -> Result<()> {
    let timings = config.timings();
    info!(
        registry = %config.settings.registry.display(),
        workers = config.settings.workers,
        "starting crank"
    );

    let providers: Arc<MemoryStore<Provider>> = Arc::new(MemoryStore::new());
    let provider_revisions: Arc<MemoryStore<ProviderRevision>> = Arc::new(MemoryStore::new());
    let configurations: Arc<MemoryStore<Configuration>> = Arc::new(MemoryStore::new());
    let configuration_revisions: Arc<MemoryStore<ConfigurationRevision>> =
        Arc::new(MemoryStore::new());
    let lock: Arc<MemoryStore<PackageLock>> = Arc::new(MemoryStore::new());

    let unpacker: Arc<dyn Unpacker> = Arc::new(DirectoryUnpacker::new(&config.settings.registry));
    let index = Arc::new(OwnershipIndex::new());
    let recorder: Arc<dyn EventRecorder> = Arc::new(TracingRecorder);

    let mut manager = Manager::new(timings, config.settings.workers).with_lock(lock.clone());

    manager.register::<Provider>(
        providers.clone(),
        Arc::new(
            PackageReconciler::<Provider, ProviderRevision>::new(
                providers.clone(),
                provider_revisions.clone(),
                lock.clone(),
                unpacker.clone(),
                recorder.clone(),
            )
            .with_timings(timings),
        ),
    );
    manager.register::<ProviderRevision>(
        provider_revisions.clone(),
        Arc::new(
            RevisionReconciler::<ProviderRevision>::new(
                provider_revisions.clone(),
                unpacker.clone(),
                index.clone(),
                recorder.clone(),
            )
            .with_timings(timings),
        ),
    );
    manager.register::<Configuration>(
        configurations.clone(),
        Arc::new(
            PackageReconciler::<Configuration, ConfigurationRevision>::new(
                configurations.clone(),
                configuration_revisions.clone(),
                lock.clone(),
                unpacker.clone(),
                recorder.clone(),
            )
            .with_timings(timings),
        ),
    );
    manager.register::<ConfigurationRevision>(
        configuration_revisions.clone(),
        Arc::new(
            RevisionReconciler::<ConfigurationRevision>::new(
                configuration_revisions.clone(),
                unpacker.clone(),
                index.clone(),
                recorder.clone(),
            )
            .with_timings(timings),
        ),
    );

    for decl in &config.providers {
        providers.create(Provider::new(&decl.name, &decl.package)).await?;
    }
    for decl in &config.configurations {
        configurations.create(Configuration::new(&decl.name, &decl.package)).await?;
    }
    info!(
        providers = config.providers.len(),
        configurations = config.configurations.len(),
        "declared packages created"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(manager.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    // The manager may already have stopped on its own
    let _ = shutdown_tx.send(true);
    running.await??;

    println!("Providers:");
    print_packages::<Provider>(&*providers).await?;
    println!("Configurations:");
    print_packages::<Configuration>(&*configurations).await?;
    println!("Owned resources: {}", index.len().await);
    Ok(())
}

async fn print_packages<P: Package>(store: &dyn Store<P>) -> Result<()> {
    let packages = store.list(&Selector::everything()).await?;
    if packages.is_empty() {
        println!("  (none)");
    }
    for package in packages {
        let package = package.object;
        let state = if package.conditioned().is_available() {
            "available"
        } else {
            "unavailable"
        };
        println!(
            "  {} {} [{}] revision {}",
            package.name(),
            package.source(),
            state,
            package.current_revision().unwrap_or("-")
        );
    }
    Ok(())
}
