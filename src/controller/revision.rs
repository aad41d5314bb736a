// src/controller/revision.rs

//! Revision reconciliation
//!
//! Applies every resource a revision's content declares. The revision's
//! desired state decides how: an `Active` revision controls its resources,
//! an `Inactive` one is recorded as a plain owner and gives up control it
//! may have held. The desired state itself is never written here.

use super::{Failure, Reconciled, Reconciler, Timings};
use crate::error::Result;
use crate::event::{Event, EventRecorder};
use crate::model::{Condition, DesiredState, OwnerReference, PackageRevision};
use crate::ownership::{Applicator, OwnerMode};
use crate::store::Store;
use crate::unpack::Unpacker;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const REASON_SYNCED: &str = "SyncPackageRevision";
const REASON_UNPACK: &str = "UnpackResources";
const REASON_APPLY: &str = "ApplyResources";

/// Progress of a revision pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionPhase {
    Start,
    ResourcesUnpacked,
    Applied,
    Failed,
}

impl fmt::Display for RevisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "Start",
            Self::ResourcesUnpacked => "ResourcesUnpacked",
            Self::Applied => "Applied",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

enum Synced {
    Gone,
    Applied { resources: usize, state: DesiredState },
}

/// Reconciles revisions of kind `R`
pub struct RevisionReconciler<R: PackageRevision> {
    revisions: Arc<dyn Store<R>>,
    unpacker: Arc<dyn Unpacker>,
    applicator: Arc<dyn Applicator>,
    recorder: Arc<dyn EventRecorder>,
    timings: Timings,
}

impl<R: PackageRevision> RevisionReconciler<R> {
    pub fn new(
        revisions: Arc<dyn Store<R>>,
        unpacker: Arc<dyn Unpacker>,
        applicator: Arc<dyn Applicator>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            revisions,
            unpacker,
            applicator,
            recorder,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    fn advance(&self, name: &str, phase: &mut RevisionPhase, next: RevisionPhase) {
        debug!(kind = R::KIND, revision = %name, from = %phase, to = %next, "revision phase");
        *phase = next;
    }

    async fn sync(&self, name: &str, phase: &mut RevisionPhase) -> std::result::Result<Synced, Failure> {
        let revision = match self.revisions.get(name).await {
            Ok(current) => current.object,
            Err(e) if e.is_not_found() => return Ok(Synced::Gone),
            Err(e) => return Err(Failure::new(REASON_SYNCED, e)),
        };

        let manifests = self
            .unpacker
            .list_resources(revision.source())
            .await
            .map_err(|e| Failure::new(REASON_UNPACK, e))?;
        self.advance(name, phase, RevisionPhase::ResourcesUnpacked);

        let state = revision.desired_state();
        let mode = match state {
            DesiredState::Active => OwnerMode::Controller,
            DesiredState::Inactive => OwnerMode::Owner,
        };
        let owner = OwnerReference::to(&revision);
        for manifest in &manifests {
            self.applicator
                .apply(manifest, &owner, mode)
                .await
                .map_err(|e| Failure::new(REASON_APPLY, e))?;
        }
        self.advance(name, phase, RevisionPhase::Applied);

        Ok(Synced::Applied {
            resources: manifests.len(),
            state,
        })
    }

    async fn record(&self, name: &str, conditions: [Condition; 2]) -> Result<bool> {
        let current = match self.revisions.get(name).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut revision = current.object.clone();
        revision.set_conditions(conditions);
        if revision.conditioned() != current.object.conditioned() {
            self.revisions.update_status(revision, current.version).await?;
        }
        Ok(true)
    }

    async fn record_success(&self, name: &str, resources: usize, state: DesiredState) -> Result<Reconciled> {
        if !self
            .record(name, [Condition::available(), Condition::reconcile_success()])
            .await?
        {
            return Ok(Reconciled::Gone);
        }
        self.recorder.record(Event::normal(
            R::KIND,
            name,
            REASON_SYNCED,
            format!("applied {} resources as {}", resources, state),
        ));
        Ok(Reconciled::Available {
            requeue_after: self.timings.resync_period,
        })
    }

    async fn record_failure(&self, name: &str, failure: Failure) -> Result<Reconciled> {
        let message = failure.error.to_string();
        self.recorder
            .record(Event::warning(R::KIND, name, failure.reason, message.clone()));
        if !self
            .record(name, [Condition::unavailable(), Condition::reconcile_error(message)])
            .await?
        {
            return Ok(Reconciled::Gone);
        }
        Ok(Reconciled::Failed {
            error: failure.error,
            requeue_after: self.timings.short_wait,
        })
    }
}

#[async_trait]
impl<R: PackageRevision> Reconciler for RevisionReconciler<R> {
    fn kind(&self) -> &'static str {
        R::KIND
    }

    async fn reconcile(&self, name: &str) -> Result<Reconciled> {
        let mut phase = RevisionPhase::Start;
        let budget = self.timings.reconcile_timeout;
        let outcome = match tokio::time::timeout(budget, self.sync(name, &mut phase)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Failure::timeout(budget)),
        };

        match outcome {
            Ok(Synced::Gone) => {
                debug!(kind = R::KIND, revision = %name, "revision gone");
                Ok(Reconciled::Gone)
            }
            Ok(Synced::Applied { resources, state }) => {
                self.timings
                    .bounded(self.record_success(name, resources, state))
                    .await
            }
            Err(failure) => {
                warn!(
                    kind = R::KIND,
                    revision = %name,
                    %phase,
                    reason = failure.reason,
                    error = %failure.error,
                    "revision reconcile failed"
                );
                self.advance(name, &mut phase, RevisionPhase::Failed);
                self.timings
                    .bounded(self.record_failure(name, failure))
                    .await
            }
        }
    }
}
