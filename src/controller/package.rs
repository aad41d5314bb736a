// src/controller/package.rs

//! Package reconciliation
//!
//! One pass for one package:
//!
//! 1. Load the ledger and rebuild the dependency graph from it
//! 2. If the package is not registered yet, resolve its content, add it to
//!    the graph, validate (every dependency registered, no cycle) and commit
//!    the new ledger entry
//! 3. Make sure a revision named after the content digest exists
//! 4. Record the outcome on the package status
//!
//! The ledger commit is a compare-and-swap. Losing the race fails the pass;
//! the resolved content is kept so the retry only redoes the cheap part.
//! Dependencies are never installed automatically: a package whose
//! dependency is not registered stays `Unavailable` until it is.

use super::{Failure, Reconciled, Reconciler, Timings};
use crate::error::Result;
use crate::event::{Event, EventRecorder};
use crate::lock::{LockEntry, LockSnapshot, PackageLock};
use crate::model::{
    Condition, DesiredState, ObjectMeta, OwnerReference, PACKAGE_LABEL, Package, PackageRevision,
};
use crate::ownership::ApplyError;
use crate::reference::canonical_name;
use crate::store::{Selector, Store, Versioned};
use crate::unpack::{Resolution, Unpacker};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const REASON_SYNCED: &str = "SyncPackage";
const REASON_LOCK: &str = "LoadPackageLock";
const REASON_GRAPH: &str = "BuildDependencyGraph";
const REASON_UNPACK: &str = "UnpackPackage";
const REASON_VALIDATE: &str = "ValidateDependencies";
const REASON_COMMIT: &str = "CommitPackageLock";
const REASON_REVISION: &str = "EnsureRevision";

/// Progress of a package pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackagePhase {
    Start,
    GraphBuilt,
    Validated,
    LockCommitted,
    RevisionEnsured,
    Done,
    Failed,
}

impl fmt::Display for PackagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "Start",
            Self::GraphBuilt => "GraphBuilt",
            Self::Validated => "Validated",
            Self::LockCommitted => "LockCommitted",
            Self::RevisionEnsured => "RevisionEnsured",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

enum Synced {
    Gone,
    Revision(String),
}

/// Reconciles packages of kind `P` into revisions of kind `R`
pub struct PackageReconciler<P: Package, R: PackageRevision> {
    packages: Arc<dyn Store<P>>,
    revisions: Arc<dyn Store<R>>,
    lock: Arc<dyn Store<PackageLock>>,
    unpacker: Arc<dyn Unpacker>,
    recorder: Arc<dyn EventRecorder>,
    timings: Timings,
    /// Resolutions kept after a lost ledger race: package name to
    /// (reference, resolution)
    stash: Mutex<HashMap<String, (String, Resolution)>>,
}

impl<P: Package, R: PackageRevision> PackageReconciler<P, R> {
    pub fn new(
        packages: Arc<dyn Store<P>>,
        revisions: Arc<dyn Store<R>>,
        lock: Arc<dyn Store<PackageLock>>,
        unpacker: Arc<dyn Unpacker>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            packages,
            revisions,
            lock,
            unpacker,
            recorder,
            timings: Timings::default(),
            stash: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    fn advance(&self, name: &str, phase: &mut PackagePhase, next: PackagePhase) {
        debug!(kind = P::KIND, package = %name, from = %phase, to = %next, "package phase");
        *phase = next;
    }

    /// Remove the stashed resolution of `name`, returning it if it was made
    /// for `reference`
    fn take_stashed(&self, name: &str, reference: &str) -> Option<Resolution> {
        let (stashed_for, resolution) = self.stash.lock().ok()?.remove(name)?;
        (stashed_for == reference).then_some(resolution)
    }

    fn stash_resolution(&self, name: &str, reference: &str, resolution: Resolution) {
        if let Ok(mut stash) = self.stash.lock() {
            stash.insert(name.to_string(), (reference.to_string(), resolution));
        }
    }

    fn forget_stashed(&self, name: &str) {
        if let Ok(mut stash) = self.stash.lock() {
            stash.remove(name);
        }
    }

    async fn resolve(&self, name: &str, reference: &str) -> std::result::Result<Resolution, Failure> {
        if let Some(resolution) = self.take_stashed(name, reference) {
            debug!(%reference, digest = %resolution.digest, "using resolution from previous attempt");
            return Ok(resolution);
        }
        self.unpacker
            .resolve(reference)
            .await
            .map_err(|e| Failure::new(REASON_UNPACK, e))
    }

    async fn sync(&self, name: &str, phase: &mut PackagePhase) -> std::result::Result<Synced, Failure> {
        let package = match self.packages.get(name).await {
            Ok(current) => current.object,
            Err(e) if e.is_not_found() => {
                self.forget_stashed(name);
                return Ok(Synced::Gone);
            }
            Err(e) => return Err(Failure::new(REASON_SYNCED, e)),
        };

        let mut snapshot = LockSnapshot::load(&*self.lock)
            .await
            .map_err(|e| Failure::new(REASON_LOCK, e))?;
        let mut graph = snapshot.graph().map_err(|e| Failure::new(REASON_GRAPH, e))?;
        self.advance(name, phase, PackagePhase::GraphBuilt);

        let source = package.source().to_string();
        let key = LockSnapshot::resolve(&source);

        let (digest, dependencies) = if let Some(entry) = snapshot.entry(&key) {
            // Registered by an earlier pass, possibly one that lost a race
            self.forget_stashed(name);
            let recorded = self
                .recorded_digest(&package, &source)
                .await
                .map_err(|e| Failure::new(REASON_REVISION, e))?;
            let digest = match recorded {
                Some(digest) => digest,
                // The ledger entry keeps what was registered first
                None => {
                    self.unpacker
                        .resolve(&source)
                        .await
                        .map_err(|e| Failure::new(REASON_UNPACK, e))?
                        .digest
                }
            };
            debug!(package = %name, %key, %digest, "package already registered");
            self.advance(name, phase, PackagePhase::LockCommitted);
            (digest, entry.dependencies.clone())
        } else {
            let resolution = self.resolve(name, &source).await?;

            let dependency_names: Vec<String> =
                resolution.dependencies.iter().map(|d| canonical_name(d)).collect();
            graph
                .add_node(&key)
                .and_then(|_| graph.add_edges(&key, &dependency_names))
                .and_then(|_| graph.sort())
                .map_err(|e| Failure::new(REASON_VALIDATE, e))?;
            self.advance(name, phase, PackagePhase::Validated);

            snapshot.upsert(
                key.clone(),
                LockEntry {
                    name: package.name().to_string(),
                    image: source.clone(),
                    dependencies: resolution.dependencies.clone(),
                },
            );
            if let Err(e) = snapshot.commit(&*self.lock).await {
                if e.is_conflict() {
                    self.stash_resolution(name, &source, resolution);
                }
                return Err(Failure::new(REASON_COMMIT, e));
            }
            self.advance(name, phase, PackagePhase::LockCommitted);
            (resolution.digest, resolution.dependencies)
        };

        self.ensure_revision(&package, &digest, dependencies)
            .await
            .map_err(|e| Failure::new(REASON_REVISION, e))?;
        self.advance(name, phase, PackagePhase::RevisionEnsured);

        Ok(Synced::Revision(digest))
    }

    /// The package's current revision, if that revision was made from
    /// `source`
    async fn recorded_digest(&self, package: &P, source: &str) -> Result<Option<String>> {
        let Some(current) = package.current_revision() else {
            return Ok(None);
        };
        match self.revisions.get(current).await {
            Ok(revision) if revision.object.source() == source => Ok(Some(current.to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create the revision for `digest` unless it exists
    ///
    /// An existing revision is never modified; its desired state belongs to
    /// whoever rolls packages out.
    async fn ensure_revision(&self, package: &P, digest: &str, dependencies: Vec<String>) -> Result<()> {
        match self.revisions.get(digest).await {
            Ok(existing) => {
                let meta = existing.object.meta();
                if !meta.is_controllable_by(package.meta().uid) {
                    let controller = meta.controller().map(ToString::to_string).unwrap_or_default();
                    return Err(ApplyError::NotControllable {
                        resource: format!("{}/{}", R::KIND, digest),
                        controller,
                    }
                    .into());
                }
                debug!(package = %package.name(), revision = %digest, "revision exists");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let ordinal = self.next_ordinal(package.name()).await?;

                let mut revision = R::default();
                *revision.meta_mut() = ObjectMeta::new(digest).with_label(PACKAGE_LABEL, package.name());
                revision
                    .meta_mut()
                    .add_owner_reference(OwnerReference::to(package).as_controller());
                revision.set_source(package.source().to_string());
                revision.set_desired_state(DesiredState::Inactive);
                revision.set_revision(ordinal);
                revision.set_dependencies(dependencies);

                self.revisions.create(revision).await?;
                info!(
                    kind = R::KIND,
                    package = %package.name(),
                    revision = %digest,
                    ordinal,
                    "created package revision"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn next_ordinal(&self, package: &str) -> Result<i64> {
        let existing = self
            .revisions
            .list(&Selector::everything().with_label(PACKAGE_LABEL, package))
            .await?;
        Ok(existing
            .iter()
            .map(|r| r.object.revision())
            .max()
            .map_or(1, |max| max + 1))
    }

    async fn write_status(&self, current: Versioned<P>, updated: P) -> Result<()> {
        if updated.conditioned() == current.object.conditioned()
            && updated.current_revision() == current.object.current_revision()
        {
            return Ok(());
        }
        self.packages.update_status(updated, current.version).await?;
        Ok(())
    }

    async fn record_success(&self, name: &str, digest: &str) -> Result<Reconciled> {
        let current = match self.packages.get(name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(Reconciled::Gone),
            Err(e) => return Err(e),
        };

        let mut package = current.object.clone();
        package.set_current_revision(digest.to_string());
        package.set_conditions([Condition::available(), Condition::reconcile_success()]);
        self.write_status(current, package).await?;

        self.recorder.record(Event::normal(
            P::KIND,
            name,
            REASON_SYNCED,
            format!("package synced to revision {}", digest),
        ));
        Ok(Reconciled::Available {
            requeue_after: self.timings.resync_period,
        })
    }

    async fn record_failure(&self, name: &str, failure: Failure) -> Result<Reconciled> {
        let message = failure.error.to_string();
        self.recorder
            .record(Event::warning(P::KIND, name, failure.reason, message.clone()));

        let current = match self.packages.get(name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(Reconciled::Gone),
            Err(e) => return Err(e),
        };

        let mut package = current.object.clone();
        package.set_conditions([Condition::unavailable(), Condition::reconcile_error(message)]);
        self.write_status(current, package).await?;

        Ok(Reconciled::Failed {
            error: failure.error,
            requeue_after: self.timings.short_wait,
        })
    }
}

#[async_trait]
impl<P: Package, R: PackageRevision> Reconciler for PackageReconciler<P, R> {
    fn kind(&self) -> &'static str {
        P::KIND
    }

    async fn reconcile(&self, name: &str) -> Result<Reconciled> {
        let mut phase = PackagePhase::Start;
        let budget = self.timings.reconcile_timeout;
        let outcome = match tokio::time::timeout(budget, self.sync(name, &mut phase)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Failure::timeout(budget)),
        };

        match outcome {
            Ok(Synced::Gone) => {
                debug!(kind = P::KIND, package = %name, "package gone");
                Ok(Reconciled::Gone)
            }
            Ok(Synced::Revision(digest)) => {
                self.advance(name, &mut phase, PackagePhase::Done);
                self.timings.bounded(self.record_success(name, &digest)).await
            }
            Err(failure) => {
                warn!(
                    kind = P::KIND,
                    package = %name,
                    %phase,
                    reason = failure.reason,
                    error = %failure.error,
                    "package reconcile failed"
                );
                self.advance(name, &mut phase, PackagePhase::Failed);
                self.timings.bounded(self.record_failure(name, failure)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::{MemoryRecorder, Severity};
    use crate::lock::{LOCK_NAME, ensure_lock};
    use crate::model::{ConditionReason, ConditionType, Provider, ProviderRevision};
    use crate::resolver::GraphError;
    use crate::store::{MemoryStore, Version, WatchEvent};
    use crate::unpack::{StaticUnpacker, UnpackError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;

    type ProviderReconciler = PackageReconciler<Provider, ProviderRevision>;

    struct Harness {
        providers: Arc<MemoryStore<Provider>>,
        revisions: Arc<MemoryStore<ProviderRevision>>,
        lock: Arc<MemoryStore<PackageLock>>,
        unpacker: Arc<StaticUnpacker>,
        recorder: Arc<MemoryRecorder>,
        reconciler: ProviderReconciler,
    }

    async fn harness(unpacker: StaticUnpacker) -> Harness {
        let providers: Arc<MemoryStore<Provider>> = Arc::new(MemoryStore::new());
        let revisions: Arc<MemoryStore<ProviderRevision>> = Arc::new(MemoryStore::new());
        let lock: Arc<MemoryStore<PackageLock>> = Arc::new(MemoryStore::new());
        let unpacker = Arc::new(unpacker);
        let recorder = Arc::new(MemoryRecorder::new());
        ensure_lock(&*lock).await.unwrap();

        let reconciler = ProviderReconciler::new(
            providers.clone(),
            revisions.clone(),
            lock.clone(),
            unpacker.clone(),
            recorder.clone(),
        );
        Harness {
            providers,
            revisions,
            lock,
            unpacker,
            recorder,
            reconciler,
        }
    }

    impl Harness {
        async fn install(&self, name: &str, source: &str) {
            self.providers.create(Provider::new(name, source)).await.unwrap();
        }

        async fn provider(&self, name: &str) -> Provider {
            self.providers.get(name).await.unwrap().object
        }

        async fn ledger(&self) -> Versioned<PackageLock> {
            self.lock.get(LOCK_NAME).await.unwrap()
        }
    }

    fn reason(provider: &Provider, condition_type: ConditionType) -> ConditionReason {
        provider.condition(condition_type).unwrap().reason
    }

    #[tokio::test]
    async fn test_first_pass_registers_package_and_creates_revision() {
        let h = harness(StaticUnpacker::new().with_package("pkg-x:v1", "d1", &[], vec![])).await;
        h.install("x", "pkg-x:v1").await;

        let result = h.reconciler.reconcile("x").await.unwrap();
        assert!(result.is_available());
        assert_eq!(result.requeue_after(), Some(Duration::from_secs(60)));

        let ledger = h.ledger().await;
        let entry = ledger.object.spec.packages.get("pkg-x").unwrap();
        assert_eq!(entry.image, "pkg-x:v1");
        assert_eq!(entry.name, "x");

        let provider = h.provider("x").await;
        let revision = h.revisions.get("d1").await.unwrap().object;
        assert_eq!(revision.desired_state(), DesiredState::Inactive);
        assert_eq!(revision.revision(), 1);
        assert_eq!(revision.source(), "pkg-x:v1");
        assert_eq!(revision.metadata.labels.get(PACKAGE_LABEL).map(String::as_str), Some("x"));
        let controller = revision.metadata.controller().unwrap();
        assert_eq!(controller.uid, provider.metadata.uid);
        assert_eq!(controller.kind, "Provider");

        assert_eq!(provider.current_revision(), Some("d1"));
        assert_eq!(reason(&provider, ConditionType::Ready), ConditionReason::Available);
        assert_eq!(reason(&provider, ConditionType::Synced), ConditionReason::ReconcileSuccess);

        let events = h.recorder.events_for("x");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Normal);
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let h = harness(StaticUnpacker::new().with_package("pkg-x:v1", "d1", &[], vec![])).await;
        h.install("x", "pkg-x:v1").await;
        h.reconciler.reconcile("x").await.unwrap();

        // Someone activates the revision between passes
        let current = h.revisions.get("d1").await.unwrap();
        let mut revision = current.object.clone();
        revision.set_desired_state(DesiredState::Active);
        h.revisions.update(revision, current.version).await.unwrap();

        let ledger_before = h.ledger().await.version;
        let provider_before = h.providers.get("x").await.unwrap();

        let result = h.reconciler.reconcile("x").await.unwrap();
        assert!(result.is_available());

        assert_eq!(h.revisions.len().await, 1);
        assert_eq!(h.ledger().await.version, ledger_before);
        assert_eq!(h.unpacker.resolve_calls(), 1);
        assert_eq!(
            h.revisions.get("d1").await.unwrap().object.desired_state(),
            DesiredState::Active
        );

        let provider_after = h.providers.get("x").await.unwrap();
        assert_eq!(provider_after.version, provider_before.version);
        assert_eq!(
            provider_after.object.status.conditioned,
            provider_before.object.status.conditioned
        );
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_validation() {
        let h = harness(StaticUnpacker::new().with_package("pkg-a:v1", "da", &["pkg-b:v1"], vec![])).await;
        h.install("a", "pkg-a:v1").await;

        let result = h.reconciler.reconcile("a").await.unwrap();
        assert!(matches!(
            result.error(),
            Some(Error::Validation(GraphError::UnknownNode { .. }))
        ));
        assert_eq!(result.requeue_after(), Some(Duration::from_secs(30)));

        assert!(!h.ledger().await.object.spec.packages.contains_key("pkg-a"));
        assert!(h.revisions.is_empty().await);

        let provider = h.provider("a").await;
        assert_eq!(reason(&provider, ConditionType::Ready), ConditionReason::Unavailable);
        assert_eq!(reason(&provider, ConditionType::Synced), ConditionReason::ReconcileError);
        assert!(provider.current_revision().is_none());

        let events = h.recorder.events_for("a");
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].reason, REASON_VALIDATE);
    }

    #[tokio::test]
    async fn test_dependency_registered_first_succeeds() {
        let unpacker = StaticUnpacker::new()
            .with_package("pkg-a:v1", "da", &["pkg-b:v2"], vec![])
            .with_package("pkg-b:v1", "db", &[], vec![]);
        let h = harness(unpacker).await;
        h.install("b", "pkg-b:v1").await;
        h.install("a", "pkg-a:v1").await;

        assert!(h.reconciler.reconcile("b").await.unwrap().is_available());
        assert!(h.reconciler.reconcile("a").await.unwrap().is_available());

        let graph = h.ledger().await.object.spec.to_graph().unwrap();
        assert_eq!(graph.sort().unwrap(), vec!["pkg-b", "pkg-a"]);
        assert_eq!(h.revisions.get("da").await.unwrap().object.dependencies(), ["pkg-b:v2"]);
    }

    #[tokio::test]
    async fn test_self_dependency_is_a_cycle() {
        let h = harness(StaticUnpacker::new().with_package("pkg-a:v1", "da", &["pkg-a:v0"], vec![])).await;
        h.install("a", "pkg-a:v1").await;

        let result = h.reconciler.reconcile("a").await.unwrap();
        assert!(matches!(
            result.error(),
            Some(Error::Validation(GraphError::Cycle { node })) if node == "pkg-a"
        ));
        assert!(!h.ledger().await.object.spec.packages.contains_key("pkg-a"));
    }

    #[tokio::test]
    async fn test_unpack_failure_marks_unavailable() {
        let unpacker = StaticUnpacker::new();
        unpacker.fail(
            "pkg-x:v1",
            UnpackError::RegistryUnavailable {
                reference: "pkg-x:v1".to_string(),
                reason: "connection refused".to_string(),
            },
        );
        let h = harness(unpacker).await;
        h.install("x", "pkg-x:v1").await;

        let result = h.reconciler.reconcile("x").await.unwrap();
        assert!(matches!(result.error(), Some(Error::Unpack(_))));
        assert_eq!(
            reason(&h.provider("x").await, ConditionType::Ready),
            ConditionReason::Unavailable
        );
        assert_eq!(h.recorder.events_for("x")[0].reason, REASON_UNPACK);
    }

    #[tokio::test]
    async fn test_missing_package_is_gone() {
        let h = harness(StaticUnpacker::new()).await;
        let result = h.reconciler.reconcile("nope").await.unwrap();
        assert!(matches!(result, Reconciled::Gone));
        assert!(h.recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_ledger_fails_and_requeues() {
        let providers: Arc<MemoryStore<Provider>> = Arc::new(MemoryStore::new());
        providers.create(Provider::new("x", "pkg-x:v1")).await.unwrap();
        let reconciler = ProviderReconciler::new(
            providers.clone(),
            Arc::new(MemoryStore::<ProviderRevision>::new()),
            Arc::new(MemoryStore::<PackageLock>::new()),
            Arc::new(StaticUnpacker::new()),
            Arc::new(MemoryRecorder::new()),
        );

        let result = reconciler.reconcile("x").await.unwrap();
        assert!(result.error().is_some_and(|e| e.is_not_found()));
        assert_eq!(result.requeue_after(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_new_digest_gets_next_ordinal() {
        let unpacker = StaticUnpacker::new()
            .with_package("pkg-x:v1", "d1", &[], vec![])
            .with_package("pkg-x:v2", "d2", &[], vec![]);
        let h = harness(unpacker).await;
        h.install("x", "pkg-x:v1").await;
        h.reconciler.reconcile("x").await.unwrap();

        let current = h.providers.get("x").await.unwrap();
        let mut provider = current.object.clone();
        provider.set_source("pkg-x:v2".to_string());
        h.providers.update(provider, current.version).await.unwrap();

        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());

        assert_eq!(h.revisions.get("d2").await.unwrap().object.revision(), 2);
        assert_eq!(h.revisions.get("d1").await.unwrap().object.revision(), 1);
        assert_eq!(h.provider("x").await.current_revision(), Some("d2"));
        // Ledger keeps the first registration
        assert_eq!(
            h.ledger().await.object.spec.packages["pkg-x"].image,
            "pkg-x:v1"
        );
    }

    async fn set_source(h: &Harness, name: &str, source: &str) {
        let current = h.providers.get(name).await.unwrap();
        let mut provider = current.object.clone();
        provider.set_source(source.to_string());
        h.providers.update(provider, current.version).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_returns_to_first_revision() {
        let unpacker = StaticUnpacker::new()
            .with_package("pkg-x:v1", "d1", &[], vec![])
            .with_package("pkg-x:v2", "d2", &[], vec![]);
        let h = harness(unpacker).await;
        h.install("x", "pkg-x:v1").await;
        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());

        set_source(&h, "x", "pkg-x:v2").await;
        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());
        assert_eq!(h.provider("x").await.current_revision(), Some("d2"));

        set_source(&h, "x", "pkg-x:v1").await;
        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());
        assert_eq!(h.provider("x").await.current_revision(), Some("d1"));
        assert_eq!(h.revisions.len().await, 2);
        assert_eq!(h.revisions.get("d1").await.unwrap().object.revision(), 1);
    }

    #[tokio::test]
    async fn test_registered_package_with_unregistered_dependency() {
        let h = harness(StaticUnpacker::new().with_package("pkg-a:v1", "da", &["pkg-b:v1"], vec![])).await;
        let ledger = h.ledger().await;
        let mut lock = ledger.object.clone();
        lock.spec.packages.insert(
            "pkg-a".to_string(),
            LockEntry {
                name: "a".to_string(),
                image: "pkg-a:v1".to_string(),
                dependencies: vec!["pkg-b".to_string()],
            },
        );
        h.lock.update(lock, ledger.version).await.unwrap();
        h.install("a", "pkg-a:v1").await;

        let result = h.reconciler.reconcile("a").await.unwrap();
        assert!(matches!(
            result.error(),
            Some(Error::Validation(GraphError::UnknownNode { .. }))
        ));
        assert_eq!(result.requeue_after(), Some(Duration::from_secs(30)));
        assert!(h.revisions.is_empty().await);

        let provider = h.provider("a").await;
        assert_eq!(reason(&provider, ConditionType::Ready), ConditionReason::Unavailable);
        assert_eq!(reason(&provider, ConditionType::Synced), ConditionReason::ReconcileError);
        assert_eq!(h.recorder.events_for("a")[0].reason, REASON_GRAPH);
    }

    #[tokio::test]
    async fn test_stash_cleared_when_package_registered_or_gone() {
        let h = harness(StaticUnpacker::new().with_package("pkg-x:v1", "d1", &[], vec![])).await;
        h.install("x", "pkg-x:v1").await;
        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());

        let stale = || Resolution {
            digest: "d1".to_string(),
            dependencies: vec![],
        };
        h.reconciler.stash_resolution("x", "pkg-x:v1", stale());
        h.reconciler.stash_resolution("gone", "pkg-gone:v1", stale());

        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());
        assert!(matches!(
            h.reconciler.reconcile("gone").await.unwrap(),
            Reconciled::Gone
        ));
        assert!(h.reconciler.stash.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stash_ignored_for_other_reference() {
        let h = harness(StaticUnpacker::new().with_package("pkg-x:v2", "d2", &[], vec![])).await;
        h.install("x", "pkg-x:v2").await;
        h.reconciler.stash_resolution(
            "x",
            "pkg-x:v1",
            Resolution {
                digest: "d1".to_string(),
                dependencies: vec![],
            },
        );

        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());
        assert_eq!(h.unpacker.resolve_calls(), 1);
        assert_eq!(h.provider("x").await.current_revision(), Some("d2"));
    }

    #[tokio::test]
    async fn test_revision_controlled_by_other_package_fails_closed() {
        let unpacker = StaticUnpacker::new()
            .with_package("pkg-x:v1", "d1", &[], vec![])
            .with_package("pkg-y:v1", "d1", &[], vec![]);
        let h = harness(unpacker).await;
        h.install("x", "pkg-x:v1").await;
        h.install("y", "pkg-y:v1").await;

        assert!(h.reconciler.reconcile("x").await.unwrap().is_available());
        let result = h.reconciler.reconcile("y").await.unwrap();
        assert!(matches!(
            result.error(),
            Some(Error::Apply(ApplyError::NotControllable { .. }))
        ));

        let revision = h.revisions.get("d1").await.unwrap().object;
        assert_eq!(
            revision.metadata.controller().unwrap().uid,
            h.provider("x").await.metadata.uid
        );
    }

    /// Ledger store that lets a competing writer in before the first update
    struct RacingLock {
        inner: MemoryStore<PackageLock>,
        raced: AtomicBool,
    }

    #[async_trait]
    impl Store<PackageLock> for RacingLock {
        async fn get(&self, name: &str) -> Result<Versioned<PackageLock>> {
            self.inner.get(name).await
        }

        async fn create(&self, object: PackageLock) -> Result<Version> {
            self.inner.create(object).await
        }

        async fn update(&self, object: PackageLock, version: Version) -> Result<Version> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let competing = self.inner.get(LOCK_NAME).await?;
                let mut lock = competing.object.clone();
                lock.spec.packages.insert(
                    "pkg-z".to_string(),
                    LockEntry {
                        name: "z".to_string(),
                        image: "pkg-z:v1".to_string(),
                        dependencies: vec![],
                    },
                );
                self.inner.update(lock, competing.version).await?;
            }
            self.inner.update(object, version).await
        }

        async fn update_status(&self, object: PackageLock, version: Version) -> Result<Version> {
            self.inner.update_status(object, version).await
        }

        async fn list(&self, selector: &Selector) -> Result<Vec<Versioned<PackageLock>>> {
            self.inner.list(selector).await
        }

        fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn test_conflict_retry_reuses_resolution() {
        let lock = Arc::new(RacingLock {
            inner: MemoryStore::new(),
            raced: AtomicBool::new(false),
        });
        ensure_lock(&*lock).await.unwrap();
        let providers: Arc<MemoryStore<Provider>> = Arc::new(MemoryStore::new());
        providers.create(Provider::new("x", "pkg-x:v1")).await.unwrap();
        let unpacker = Arc::new(StaticUnpacker::new().with_package("pkg-x:v1", "d1", &[], vec![]));
        let reconciler = ProviderReconciler::new(
            providers.clone(),
            Arc::new(MemoryStore::<ProviderRevision>::new()),
            lock.clone(),
            unpacker.clone(),
            Arc::new(MemoryRecorder::new()),
        );

        let first = reconciler.reconcile("x").await.unwrap();
        assert!(first.error().is_some_and(|e| e.is_conflict()));
        assert_eq!(unpacker.resolve_calls(), 1);

        let second = reconciler.reconcile("x").await.unwrap();
        assert!(second.is_available());
        assert_eq!(unpacker.resolve_calls(), 1);

        let ledger = lock.get(LOCK_NAME).await.unwrap().object;
        assert!(ledger.spec.packages.contains_key("pkg-x"));
        assert!(ledger.spec.packages.contains_key("pkg-z"));
    }

    struct SlowUnpacker;

    #[async_trait]
    impl Unpacker for SlowUnpacker {
        async fn resolve(&self, _reference: &str) -> std::result::Result<Resolution, UnpackError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            unreachable!("resolve outlived the reconcile timeout")
        }

        async fn list_resources(
            &self,
            _reference: &str,
        ) -> std::result::Result<Vec<crate::model::Manifest>, UnpackError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_timeout_goes_through_failure_path() {
        let providers: Arc<MemoryStore<Provider>> = Arc::new(MemoryStore::new());
        providers.create(Provider::new("x", "pkg-x:v1")).await.unwrap();
        let lock: Arc<MemoryStore<PackageLock>> = Arc::new(MemoryStore::new());
        ensure_lock(&*lock).await.unwrap();
        let recorder = Arc::new(MemoryRecorder::new());
        let reconciler = ProviderReconciler::new(
            providers.clone(),
            Arc::new(MemoryStore::<ProviderRevision>::new()),
            lock,
            Arc::new(SlowUnpacker),
            recorder.clone(),
        )
        .with_timings(Timings {
            reconcile_timeout: Duration::from_millis(50),
            ..Timings::default()
        });

        let result = reconciler.reconcile("x").await.unwrap();
        assert!(matches!(result.error(), Some(Error::Timeout { .. })));
        assert_eq!(recorder.events_for("x")[0].reason, super::super::REASON_TIMEOUT);

        let provider = providers.get("x").await.unwrap().object;
        assert_eq!(
            provider.condition(ConditionType::Ready).unwrap().reason,
            ConditionReason::Unavailable
        );
    }
}
